//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use feedline_core::RetryPolicy;
use feedline_fetch::FetchLimits;
use serde::Deserialize;

/// Global configuration for feedline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub feed: FeedConfig,
    pub fetch: FetchConfig,
    pub run: RunConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per table
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./state"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub query: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
    /// Serve items from a JSON file instead of the network
    pub fixture: Option<PathBuf>,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://public.api.bsky.app".to_string(),
            query: "rust".to_string(),
            token: None,
            fixture: None,
            request_timeout: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: usize,
    pub max_iterations: usize,
    /// Seconds
    pub time_budget: u64,
    /// Seconds
    pub safety_margin: u64,
    pub min_items: u64,
    pub prefetch_depth: usize,
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let limits = FetchLimits::default();
        Self {
            page_size: limits.page_size,
            max_iterations: limits.max_iterations,
            time_budget: limits.time_budget.as_secs(),
            safety_margin: limits.safety_margin.as_secs(),
            min_items: limits.min_items,
            prefetch_depth: limits.prefetch_depth,
            max_retries: limits.retry.max_retries,
        }
    }
}

impl FetchConfig {
    pub fn limits(&self) -> FetchLimits {
        FetchLimits {
            page_size: self.page_size,
            max_iterations: self.max_iterations,
            time_budget: Duration::from_secs(self.time_budget),
            safety_margin: Duration::from_secs(self.safety_margin),
            min_items: self.min_items,
            prefetch_depth: self.prefetch_depth,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            ..FetchLimits::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub interval_minutes: u32,
    pub max_fetch_invocations: u32,
    pub batch_size: usize,
    pub top_n: usize,
    pub dry_run: bool,
    pub ttl_days: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let defaults = feedline_pipeline::Config::default();
        Self {
            interval_minutes: defaults.interval_minutes,
            max_fetch_invocations: defaults.max_fetch_invocations,
            batch_size: defaults.batch_size,
            top_n: defaults.top_n,
            dry_run: defaults.dry_run,
            ttl_days: defaults.run_ttl.num_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Webhook receiving the summary; logged only when unset
    pub webhook_url: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./feedline.toml (current directory)
    /// 2. ~/.config/feedline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("feedline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "feedline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Pipeline settings derived from this file.
    pub fn pipeline(&self) -> feedline_pipeline::Config {
        let defaults = feedline_pipeline::Config::default();
        feedline_pipeline::Config {
            interval_minutes: self.run.interval_minutes,
            fetch: FetchLimits {
                request_timeout: Duration::from_secs(self.feed.request_timeout),
                ..self.fetch.limits()
            },
            max_fetch_invocations: self.run.max_fetch_invocations,
            batch_size: self.run.batch_size,
            top_n: self.run.top_n,
            dry_run: self.run.dry_run,
            run_ttl: chrono::Duration::days(self.run.ttl_days),
            ..defaults
        }
    }
}
