//! Fetch stage: one bounded walk of the window per invocation
//!
//! Resumes from the cursor stored on the fetcher row and always uses the
//! cutoff fixed at run creation.

use anyhow::{Context as _, Result};
use feedline_fetch::{FetchOutcome, StoreSink, WindowFetcher};
use feedline_store::{RunState, RunStatus, Stage};

use crate::context::Context;

/// Result of one fetcher invocation.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub state: RunState,
    /// `None` when the stage was already complete and nothing was fetched.
    pub outcome: Option<FetchOutcome>,
}

impl FetchReport {
    /// No further fetcher invocation is needed.
    pub fn is_complete(&self) -> bool {
        self.state.status == RunStatus::Complete
    }
}

pub fn run(ctx: &Context, run_id: &str) -> Result<FetchReport> {
    let runs = &ctx.stores.runs;
    let state = runs.advance(run_id, Stage::Fetcher)?;
    if state.status == RunStatus::Complete {
        log::info!("{run_id}: fetch already complete ({} posts)", state.post_count);
        return Ok(FetchReport {
            state,
            outcome: None,
        });
    }

    let state = runs.modify(run_id, Stage::Fetcher, |s| {
        s.fetch_invocations += 1;
        s.status = RunStatus::InProgress;
        s.error = None;
        Ok(())
    })?;
    log::info!(
        "{run_id}: fetch invocation {}/{} from {}",
        state.fetch_invocations,
        ctx.config.max_fetch_invocations,
        state.cursor.as_deref().unwrap_or("the newest page")
    );

    let fetcher = WindowFetcher::new(ctx.feed.as_ref(), ctx.clock.clone())
        .with_limits(ctx.config.fetch)
        .with_shutdown(ctx.shutdown.clone());
    let mut sink = StoreSink::new(&ctx.stores.posts, runs, run_id);
    let outcome = fetcher
        .fetch(state.cutoff_time, state.cursor.as_deref(), &mut sink)
        .with_context(|| format!("{run_id}: fetch failed"))?;

    let max_invocations = ctx.config.max_fetch_invocations;
    let state = runs.modify(run_id, Stage::Fetcher, |s| {
        s.status = if outcome.exhausted || s.fetch_invocations >= max_invocations {
            RunStatus::Complete
        } else {
            RunStatus::InProgress
        };
        Ok(())
    })?;

    if !outcome.exhausted && state.status == RunStatus::Complete {
        log::warn!(
            "{run_id}: closing fetch after {} invocations with the window not exhausted",
            state.fetch_invocations
        );
    }
    log::info!(
        "{run_id}: +{} posts ({} total), stopped on {}",
        outcome.total,
        state.post_count,
        outcome.stop_reason
    );

    Ok(FetchReport {
        state,
        outcome: Some(outcome),
    })
}
