//! Run state: one row per (run, stage)
//!
//! The table is the pipeline's transition log. The orchestrator creates the
//! first row with a fixed cutoff; every later stage copies the row of its
//! predecessor and mutates the copy, so cumulative fields (cutoff, counters,
//! cursor) flow forward untouched unless a stage owns them.

use chrono::{DateTime, Duration, Utc};
use feedline_core::{Clock, RetryPolicy, SharedClock, retry_with_backoff};
use serde::{Deserialize, Serialize};

use crate::paging::query_all;
use crate::stage::{RunStatus, Stage};
use crate::table::{NewRow, Precondition, PutOutcome, Row, SharedTable};
use crate::{Result, StoreError};

/// Attempts for compare-and-swap updates before reporting a conflict.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// Default TTL for run rows and their batches.
pub const DEFAULT_RUN_TTL_DAYS: i64 = 7;

/// Sentiment over the scored posts of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentSummary {
    /// Mean score in [-1, 1].
    pub average: f64,
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
    pub scored: u64,
}

/// A highly engaged post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPost {
    pub uri: String,
    pub author: String,
    pub engagement: u64,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCount {
    pub author: String,
    pub posts: u64,
}

/// Computed results carried forward to the poster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub sentiment: Option<SentimentSummary>,
    #[serde(default)]
    pub top_posts: Vec<TopPost>,
    #[serde(default)]
    pub top_authors: Vec<AuthorCount>,
    #[serde(default)]
    pub published_ref: Option<String>,
}

/// State of one stage of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub stage: Stage,
    pub status: RunStatus,
    pub interval_minutes: u32,
    /// Lower bound of the fetch window. Fixed at creation.
    pub cutoff_time: DateTime<Utc>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more_posts: bool,
    #[serde(default)]
    pub post_count: u64,
    /// Highest batch index reserved for this run.
    #[serde(default)]
    pub last_batch_index: Option<u32>,
    #[serde(default)]
    pub fetch_invocations: u32,
    #[serde(default)]
    pub summary: RunSummary,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// TTL, epoch seconds.
    pub expires_at: i64,
    /// Row version as seen when read; not persisted.
    #[serde(skip)]
    pub version: u64,
}

impl RunState {
    fn from_row(row: &Row) -> Result<Self> {
        let mut state: Self = row.decode()?;
        state.version = row.version;
        Ok(state)
    }

    fn to_row(&self) -> Result<NewRow> {
        NewRow::encode(
            self.run_id.clone(),
            self.stage.as_str(),
            Some(self.expires_at),
            self,
        )
    }

    /// Copy this row into a row for `stage`, keeping cumulative fields.
    fn successor(&self, stage: Stage, now: DateTime<Utc>) -> Self {
        Self {
            stage,
            status: RunStatus::InProgress,
            error: None,
            updated_at: now,
            version: 0,
            ..self.clone()
        }
    }
}

/// Time-derived run identifier.
pub fn run_id_for(at: DateTime<Utc>) -> String {
    format!("run-{}", at.format("%Y%m%dT%H%M%SZ"))
}

/// Run state store over a table keyed by `(run_id, stage)`.
#[derive(Clone)]
pub struct RunStateStore {
    table: SharedTable,
    clock: SharedClock,
    ttl: Duration,
    retry: RetryPolicy,
}

impl RunStateStore {
    pub fn new(table: SharedTable, clock: SharedClock) -> Self {
        Self {
            table,
            clock,
            ttl: Duration::days(DEFAULT_RUN_TTL_DAYS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Create the orchestrator row. The cutoff is computed here, once.
    pub fn create_run(&self, run_id: &str, interval_minutes: u32) -> Result<RunState> {
        if run_id.is_empty() {
            return Err(StoreError::Invalid("empty run id".into()));
        }
        if interval_minutes == 0 {
            return Err(StoreError::Invalid("interval must be positive".into()));
        }
        let now = self.clock.now();
        let mut state = RunState {
            run_id: run_id.to_string(),
            stage: Stage::Orchestrator,
            status: RunStatus::InProgress,
            interval_minutes,
            cutoff_time: now - Duration::minutes(i64::from(interval_minutes)),
            cursor: None,
            has_more_posts: true,
            post_count: 0,
            last_batch_index: None,
            fetch_invocations: 0,
            summary: RunSummary::default(),
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: (now + self.ttl).timestamp(),
            version: 0,
        };
        match self.put(&state, Precondition::DoesNotExist)? {
            PutOutcome::Written { version } => {
                state.version = version;
                log::info!(
                    "{run_id}: created (interval {interval_minutes}m, cutoff {})",
                    state.cutoff_time.to_rfc3339()
                );
                Ok(state)
            }
            PutOutcome::PreconditionFailed { .. } => {
                Err(StoreError::Conflict(format!("run {run_id} already exists")))
            }
        }
    }

    /// Row for exactly `(run_id, stage)`.
    pub fn get_run(&self, run_id: &str, stage: Stage) -> Result<RunState> {
        let row = retry_with_backoff(&format!("{run_id}/{stage}: get"), &self.retry, || {
            self.table.get(run_id, stage.as_str())
        })?;
        match row {
            Some(row) => RunState::from_row(&row),
            None => Err(StoreError::NotFound(format!("{run_id}/{stage}"))),
        }
    }

    /// Upsert by `(run_id, stage)`, refreshing `updated_at`.
    pub fn update_run(&self, state: &RunState) -> Result<RunState> {
        let mut state = state.clone();
        state.updated_at = self.clock.now();
        match self.put(&state, Precondition::None)? {
            PutOutcome::Written { version } => {
                state.version = version;
                Ok(state)
            }
            PutOutcome::PreconditionFailed { .. } => Err(StoreError::Conflict(format!(
                "{}/{}: unconditional write rejected",
                state.run_id, state.stage
            ))),
        }
    }

    /// All stage rows of a run, in stage order.
    pub fn list_stages(&self, run_id: &str) -> Result<Vec<RunState>> {
        let mut states = query_all(self.table.as_ref(), run_id, "", self.retry)
            .map(|row| row.and_then(|r| RunState::from_row(&r)))
            .collect::<Result<Vec<_>>>()?;
        states.sort_by_key(|s| s.stage.order());
        Ok(states)
    }

    /// Most logically advanced stage row, decided by stage order rather
    /// than by the order the backend returns rows in.
    pub fn get_latest_run(&self, run_id: &str) -> Result<RunState> {
        self.list_stages(run_id)?
            .into_iter()
            .max_by_key(|s| s.stage.order())
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    /// Row for `to`, creating it from the latest row when the predecessor
    /// table allows the transition.
    pub fn advance(&self, run_id: &str, to: Stage) -> Result<RunState> {
        let latest = match self.get_latest_run(run_id) {
            Ok(latest) => latest,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::InvalidTransition {
                    run_id: run_id.to_string(),
                    from: None,
                    to,
                });
            }
            Err(e) => return Err(e),
        };
        if latest.stage == to {
            return Ok(latest);
        }
        if !to.allows_predecessor(latest.stage) {
            return Err(StoreError::InvalidTransition {
                run_id: run_id.to_string(),
                from: Some(latest.stage),
                to,
            });
        }

        let mut next = latest.successor(to, self.clock.now());
        match self.put(&next, Precondition::DoesNotExist)? {
            PutOutcome::Written { version } => {
                next.version = version;
                log::debug!("{run_id}: {} -> {to}", latest.stage);
                Ok(next)
            }
            // Another invocation got there first; use its row.
            PutOutcome::PreconditionFailed { .. } => self.get_run(run_id, to),
        }
    }

    /// Read-modify-write of one row guarded by its version.
    ///
    /// `f` may run more than once; it must derive its changes from the
    /// state it is given.
    pub fn modify(
        &self,
        run_id: &str,
        stage: Stage,
        mut f: impl FnMut(&mut RunState) -> Result<()>,
    ) -> Result<RunState> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut state = self.get_run(run_id, stage)?;
            let expected = state.version;
            f(&mut state)?;
            state.updated_at = self.clock.now();
            match self.put(&state, Precondition::MatchesVersion(expected))? {
                PutOutcome::Written { version } => {
                    state.version = version;
                    return Ok(state);
                }
                PutOutcome::PreconditionFailed { current_version } => {
                    log::debug!(
                        "{run_id}/{stage}: version {expected} is stale (now {current_version:?}), attempt {attempt}/{MAX_CAS_ATTEMPTS}"
                    );
                }
            }
        }
        Err(StoreError::Conflict(format!(
            "{run_id}/{stage}: gave up after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    /// Record the fetch cursor. An empty cursor clears it.
    pub fn update_cursor(&self, run_id: &str, cursor: &str, has_more: bool) -> Result<RunState> {
        let cursor = (!cursor.is_empty()).then(|| cursor.to_string());
        self.modify(run_id, Stage::Fetcher, |state| {
            state.cursor = cursor.clone();
            state.has_more_posts = has_more;
            Ok(())
        })
    }

    /// Reserve `batches` consecutive batch indices in a single conditional
    /// write. Indices start strictly after both the row's highest index and
    /// `floor` (highest index found in storage).
    ///
    /// Returns the first reserved index.
    pub fn reserve_batches(&self, run_id: &str, batches: u32, floor: Option<u32>) -> Result<u32> {
        if batches == 0 {
            return Err(StoreError::Invalid("reserve at least one batch".into()));
        }
        let mut first = 0;
        self.modify(run_id, Stage::Fetcher, |state| {
            let highest = state.last_batch_index.max(floor);
            first = highest.map_or(0, |h| h + 1);
            state.last_batch_index = Some(first + batches - 1);
            Ok(())
        })?;
        Ok(first)
    }

    /// Add `items` stored posts to the run's cumulative count.
    pub fn record_posts(&self, run_id: &str, items: u64) -> Result<RunState> {
        self.modify(run_id, Stage::Fetcher, |state| {
            state.post_count += items;
            Ok(())
        })
    }

    /// Mark a stage row failed with a message, keeping everything else.
    pub fn mark_failed(&self, run_id: &str, stage: Stage, message: &str) -> Result<RunState> {
        self.modify(run_id, stage, |state| {
            state.status = RunStatus::Failed;
            state.error = Some(message.to_string());
            Ok(())
        })
    }

    fn put(&self, state: &RunState, precondition: Precondition) -> Result<PutOutcome> {
        let row = state.to_row()?;
        retry_with_backoff(
            &format!("{}/{}: put", state.run_id, state.stage),
            &self.retry,
            || self.table.put(row.clone(), precondition),
        )
    }
}
