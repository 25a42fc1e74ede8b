//! Stage definitions and the transition table

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage identifier.
///
/// Declaration order is the logical order of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Orchestrator,
    Fetcher,
    Analyzer,
    Aggregator,
    Poster,
}

impl Stage {
    /// Sort key used for the stage's row.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Fetcher => "fetcher",
            Self::Analyzer => "analyzer",
            Self::Aggregator => "aggregator",
            Self::Poster => "poster",
        }
    }

    /// Parse a stage name (case-insensitive). Accepts the historic
    /// `first` and `fetch` names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "orchestrator" | "first" => Some(Self::Orchestrator),
            "fetcher" | "fetch" => Some(Self::Fetcher),
            "analyzer" => Some(Self::Analyzer),
            "aggregator" => Some(Self::Aggregator),
            "poster" => Some(Self::Poster),
            _ => None,
        }
    }

    /// Position in a run; higher means further advanced.
    pub fn order(self) -> u8 {
        match self {
            Self::Orchestrator => 0,
            Self::Fetcher => 1,
            Self::Analyzer => 2,
            Self::Aggregator => 3,
            Self::Poster => 4,
        }
    }

    /// Stages whose row may be copied to create this stage's row.
    pub fn predecessors(self) -> &'static [Stage] {
        match self {
            Self::Orchestrator => &[],
            Self::Fetcher => &[Self::Orchestrator, Self::Fetcher],
            Self::Analyzer => &[Self::Fetcher],
            Self::Aggregator => &[Self::Analyzer],
            Self::Poster => &[Self::Aggregator],
        }
    }

    pub fn allows_predecessor(self, from: Stage) -> bool {
        self.predecessors().contains(&from)
    }

    pub fn all() -> &'static [Stage] {
        &[
            Self::Orchestrator,
            Self::Fetcher,
            Self::Analyzer,
            Self::Aggregator,
            Self::Poster,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}
