//! Store handles used by the stages

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use feedline_core::SharedClock;
use feedline_store::{
    FileTable, MemoryTable, PostStore, RunStateStore, SharedTable, TimeSeriesStore,
};

use crate::config::Config;

/// Table names, one file each for the file backend.
pub const RUN_STATE_TABLE: &str = "run_state";
pub const POSTS_TABLE: &str = "posts";
pub const OBSERVATIONS_TABLE: &str = "observations";
pub const DAILY_TABLE: &str = "daily";

#[derive(Clone)]
pub struct Stores {
    pub runs: RunStateStore,
    pub posts: PostStore,
    pub series: TimeSeriesStore,
}

impl Stores {
    /// Build the stores over four tables.
    pub fn from_tables(
        run_state: SharedTable,
        posts: SharedTable,
        observations: SharedTable,
        daily: SharedTable,
        clock: SharedClock,
        config: &Config,
    ) -> Self {
        let runs = RunStateStore::new(run_state, clock.clone()).with_ttl(config.run_ttl);
        let posts = PostStore::new(posts, runs.clone()).with_batch_size(config.batch_size);
        let series = TimeSeriesStore::new(observations, daily, clock)
            .with_ttls(config.observation_ttl, config.daily_ttl);
        Self {
            runs,
            posts,
            series,
        }
    }

    /// Process-local tables; nothing survives the process.
    pub fn in_memory(clock: SharedClock, config: &Config) -> Self {
        let table = |name: &str| -> SharedTable { Arc::new(MemoryTable::new(name, clock.clone())) };
        Self::from_tables(
            table(RUN_STATE_TABLE),
            table(POSTS_TABLE),
            table(OBSERVATIONS_TABLE),
            table(DAILY_TABLE),
            clock.clone(),
            config,
        )
    }

    /// File-backed tables under `dir`.
    pub fn open(dir: &Path, clock: SharedClock, config: &Config) -> Result<Self> {
        let table = |name: &str| -> Result<SharedTable> {
            let table = FileTable::open(dir, name, clock.clone())
                .with_context(|| format!("failed to open table {name} in {}", dir.display()))?;
            Ok(Arc::new(table))
        };
        Ok(Self::from_tables(
            table(RUN_STATE_TABLE)?,
            table(POSTS_TABLE)?,
            table(OBSERVATIONS_TABLE)?,
            table(DAILY_TABLE)?,
            clock.clone(),
            config,
        ))
    }
}
