//! Store error taxonomy

use feedline_core::Retryable;

use crate::stage::Stage;

/// Error from a store operation.
///
/// `NotFound` is reserved for "no row exists for this exact key"; anything
/// that prevents answering that question is reported as another variant so
/// callers never mistake an outage for absence.
#[derive(Debug)]
pub enum StoreError {
    /// No row for the exact key.
    NotFound(String),
    /// Conditional write lost against a concurrent writer (after retries).
    Conflict(String),
    /// Stage transition not allowed by the predecessor table.
    InvalidTransition {
        run_id: String,
        from: Option<Stage>,
        to: Stage,
    },
    /// Backend unreachable or throttled.
    Unavailable(String),
    Io(std::io::Error),
    Serde(serde_json::Error),
    /// Malformed request or stored data.
    Invalid(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "not found: {key}"),
            Self::Conflict(msg) => write!(f, "write conflict: {msg}"),
            Self::InvalidTransition {
                run_id,
                from: Some(from),
                to,
            } => write!(f, "run {run_id}: cannot move from {from} to {to}"),
            Self::InvalidTransition {
                run_id,
                from: None,
                to,
            } => write!(f, "run {run_id}: cannot enter {to} without a predecessor"),
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Serde(e) => write!(f, "serialization: {e}"),
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
            _ => false,
        }
    }
}
