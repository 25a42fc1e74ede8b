//! Subcommands

pub mod daily;
pub mod history;
pub mod run;
pub mod stage;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use feedline_core::{EnvSecrets, SecretSource, SharedClock, SystemClock};
use feedline_fetch::{Feed, HttpFeed, HttpFeedConfig, StaticFeed};
use feedline_pipeline::{Context, LogPublisher, Publisher, Stores, WebhookPublisher};

use crate::config::Config;

/// Secret keys consulted when the config file carries no token.
const FEED_TOKEN_KEY: &str = "feed_token";
const PUBLISH_TOKEN_KEY: &str = "publish_token";

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Open the file-backed stores named by the config.
pub fn open_stores(config: &Config, clock: SharedClock) -> Result<Stores> {
    Stores::open(&config.store.dir, clock, &config.pipeline())
}

fn build_feed(config: &Config, secrets: &dyn SecretSource) -> Result<Arc<dyn Feed>> {
    if let Some(path) = &config.feed.fixture {
        let feed = StaticFeed::from_json_file(path)
            .with_context(|| format!("failed to load feed fixture {}", path.display()))?;
        log::info!("Serving {} items from {}", feed.len(), path.display());
        return Ok(Arc::new(feed));
    }
    let token = config
        .feed
        .token
        .clone()
        .or_else(|| secrets.lookup(FEED_TOKEN_KEY));
    Ok(Arc::new(HttpFeed::new(HttpFeedConfig {
        base_url: config.feed.base_url.clone(),
        query: config.feed.query.clone(),
        token,
        timeout: Duration::from_secs(config.feed.request_timeout),
    })))
}

fn build_publisher(config: &Config, secrets: &dyn SecretSource) -> Arc<dyn Publisher> {
    match &config.publish.webhook_url {
        Some(url) => {
            let token = config
                .publish
                .token
                .clone()
                .or_else(|| secrets.lookup(PUBLISH_TOKEN_KEY));
            Arc::new(
                WebhookPublisher::new(
                    url.clone(),
                    token,
                    Duration::from_secs(config.feed.request_timeout),
                )
                .with_retry(config.fetch.limits().retry),
            )
        }
        None => Arc::new(LogPublisher::default()),
    }
}

/// Stage context over file-backed stores and the configured collaborators.
pub fn build_context(config: &Config) -> Result<Context> {
    let secrets = Arc::new(EnvSecrets::default());
    let clock = system_clock();
    let pipeline = config.pipeline();
    let stores = open_stores(config, clock.clone())?;
    let feed = build_feed(config, secrets.as_ref())?;
    let publisher = build_publisher(config, secrets.as_ref());
    Ok(Context::new(pipeline, stores, clock, feed)
        .with_publisher(publisher)
        .with_secrets(secrets))
}
