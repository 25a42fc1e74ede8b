//! Pipeline runtime configuration

use chrono::Duration;
use feedline_fetch::FetchLimits;
use feedline_store::posts::DEFAULT_BATCH_SIZE;
use feedline_store::run_state::DEFAULT_RUN_TTL_DAYS;
use feedline_store::timeseries::{DEFAULT_DAILY_TTL_DAYS, DEFAULT_OBSERVATION_TTL_DAYS};

/// Runtime configuration shared by all stages
#[derive(Debug, Clone)]
pub struct Config {
    /// Width of the fetch window
    pub interval_minutes: u32,
    /// Limits for one fetcher invocation
    pub fetch: FetchLimits,
    /// Fetcher invocations per run before the window is closed anyway
    pub max_fetch_invocations: u32,
    /// Posts per stored batch
    pub batch_size: usize,
    /// Entries kept in the top-post and top-author lists
    pub top_n: usize,
    /// Suppress publishing
    pub dry_run: bool,
    pub run_ttl: Duration,
    pub observation_ttl: Duration,
    pub daily_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            fetch: FetchLimits::default(),
            max_fetch_invocations: 10,
            batch_size: DEFAULT_BATCH_SIZE,
            top_n: 5,
            dry_run: false,
            run_ttl: Duration::days(DEFAULT_RUN_TTL_DAYS),
            observation_ttl: Duration::days(DEFAULT_OBSERVATION_TTL_DAYS),
            daily_ttl: Duration::days(DEFAULT_DAILY_TTL_DAYS),
        }
    }
}
