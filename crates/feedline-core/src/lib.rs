//! Feedline Core - Common infrastructure for the feed pipeline stages
//!
//! This crate provides the pieces every stage invocation needs regardless of
//! what it does: clocks, retry, logging, shutdown handling, secrets and the
//! shared HTTP client.

pub mod clock;
pub mod http;
pub mod logging;
pub mod retry;
pub mod secrets;
pub mod shutdown;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use http::{HttpError, SHARED_RUNTIME, block_on_with_timeout, http_client, parse_retry_after};
pub use logging::init_logging;
pub use retry::{RetryPolicy, Retryable, backoff_duration, retry_with_backoff};
pub use secrets::{EnvSecrets, MapSecrets, SecretSource};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
