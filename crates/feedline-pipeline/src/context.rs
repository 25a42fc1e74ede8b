//! Everything a stage invocation needs

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use feedline_core::{EnvSecrets, SecretSource, SharedClock, shutdown_flag};
use feedline_fetch::Feed;

use crate::config::Config;
use crate::publish::{LogPublisher, Publisher};
use crate::sentiment::{LexiconScorer, SentimentScorer};
use crate::stores::Stores;

/// Secret key that turns on dry-run mode.
pub const DRY_RUN_KEY: &str = "dry_run";

/// Collaborators of one stage invocation.
pub struct Context {
    pub config: Config,
    pub stores: Stores,
    pub clock: SharedClock,
    pub feed: Arc<dyn Feed>,
    pub scorer: Arc<dyn SentimentScorer>,
    pub publisher: Arc<dyn Publisher>,
    pub secrets: Arc<dyn SecretSource>,
    pub shutdown: Arc<AtomicBool>,
}

impl Context {
    /// Context with the lexicon scorer, log publisher, environment secrets
    /// and the process shutdown flag.
    pub fn new(config: Config, stores: Stores, clock: SharedClock, feed: Arc<dyn Feed>) -> Self {
        Self {
            config,
            stores,
            clock,
            feed,
            scorer: Arc::new(LexiconScorer::default()),
            publisher: Arc::new(LogPublisher::default()),
            secrets: Arc::new(EnvSecrets::default()),
            shutdown: Arc::clone(shutdown_flag()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SentimentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Dry run if configured or flagged through secrets.
    pub fn dry_run(&self) -> bool {
        self.config.dry_run || self.secrets.flag(DRY_RUN_KEY)
    }
}
