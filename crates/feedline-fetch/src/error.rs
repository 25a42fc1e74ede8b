//! Error types for feed access and window fetching

use std::time::Duration;

use feedline_core::{HttpError, Retryable};

use crate::sink::SinkError;

/// Error from requesting one feed page.
#[derive(Debug)]
pub enum FeedError {
    /// Transport or non-success status not covered below
    Http(HttpError),
    /// 429; retried, then treated as a soft stop
    RateLimited { retry_after: Option<Duration> },
    /// The feed refuses to paginate this deep; ends the window softly
    PaginationLimit(String),
    /// Per-request deadline elapsed
    Timeout(Duration),
    /// Response body could not be understood
    Decode(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "{e}"),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (retry after {}s)", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::PaginationLimit(message) => write!(f, "pagination limit reached: {message}"),
            Self::Timeout(d) => write!(f, "feed request timed out after {}s", d.as_secs()),
            Self::Decode(message) => write!(f, "invalid feed response: {message}"),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl Retryable for FeedError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_retryable(),
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::PaginationLimit(_) | Self::Decode(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http(e) => e.retry_after(),
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl FeedError {
    /// Errors that end collection without failing the invocation.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::PaginationLimit(_))
    }
}

impl From<HttpError> for FeedError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => Self::Timeout(d),
            HttpError::Status {
                status: 429,
                retry_after,
                ..
            } => Self::RateLimited { retry_after },
            other => Self::Http(other),
        }
    }
}

/// Error that aborts a window fetch.
///
/// Everything already handed to the sink stays persisted, and the last
/// checkpointed cursor is where the next invocation resumes.
#[derive(Debug)]
pub enum FetchError {
    Feed(FeedError),
    Sink(SinkError),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feed(e) => write!(f, "feed: {e}"),
            Self::Sink(e) => write!(f, "sink: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Feed(e) => Some(e),
            Self::Sink(e) => Some(e.as_ref()),
        }
    }
}

impl From<FeedError> for FetchError {
    fn from(e: FeedError) -> Self {
        Self::Feed(e)
    }
}

impl From<SinkError> for FetchError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}
