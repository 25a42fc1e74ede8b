//! Stage dispatch and whole-run driver

use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Result, bail};
use feedline_store::{RunState, SentimentSummary, Stage, StoreError};

use crate::context::Context;
use crate::stages::{aggregator, analyzer, fetcher, orchestrator, poster};

/// Pipeline execution summary
#[derive(Debug)]
pub struct Summary {
    pub run_id: String,
    pub fetch_invocations: u32,
    pub posts: u64,
    pub window_exhausted: bool,
    pub sentiment: Option<SentimentSummary>,
    pub published_ref: Option<String>,
    pub elapsed: std::time::Duration,
}

/// Run one stage invocation. A failure is recorded on the stage's row
/// before it is returned.
///
/// The orchestrator creates a new run; `run_id` is optional only for it.
pub fn run_stage(ctx: &Context, stage: Stage, run_id: Option<&str>) -> Result<RunState> {
    let run_id = match (stage, run_id) {
        (Stage::Orchestrator, id) => return orchestrator::run(ctx, id),
        (_, Some(id)) => id,
        (_, None) => bail!("stage {stage} needs a run id"),
    };
    run_existing(ctx, stage, run_id).inspect_err(|e| record_failure(ctx, run_id, stage, e))
}

fn run_existing(ctx: &Context, stage: Stage, run_id: &str) -> Result<RunState> {
    match stage {
        Stage::Orchestrator => bail!("{run_id}: the orchestrator only creates runs"),
        Stage::Fetcher => fetcher::run(ctx, run_id).map(|report| report.state),
        Stage::Analyzer => analyzer::run(ctx, run_id),
        Stage::Aggregator => aggregator::run(ctx, run_id),
        Stage::Poster => poster::run(ctx, run_id),
    }
}

fn record_failure(ctx: &Context, run_id: &str, stage: Stage, error: &anyhow::Error) {
    let message = format!("{error:#}");
    log::error!("{run_id}/{stage}: {message}");
    // A rejected transition never touched the run; the target row may
    // belong to a stage that already completed.
    if let Some(StoreError::InvalidTransition { .. }) = error.downcast_ref::<StoreError>() {
        return;
    }
    match ctx.stores.runs.mark_failed(run_id, stage, &message) {
        Ok(_) => {}
        // The stage failed before its row existed.
        Err(StoreError::NotFound(_)) => {}
        Err(e) => log::warn!("{run_id}/{stage}: could not record failure: {e}"),
    }
}

/// Drive a run through every stage.
///
/// With an id of an existing run, continues from its latest stage;
/// otherwise creates the run first. The fetcher is invoked until the
/// window is exhausted or the invocation limit closes it.
pub fn run_pipeline(ctx: &Context, run_id: Option<&str>) -> Result<Summary> {
    let start = Instant::now();

    let existing = match run_id {
        Some(id) => match ctx.stores.runs.get_latest_run(id) {
            Ok(latest) => Some(latest),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    let latest = match existing {
        Some(latest) => {
            log::info!("{}: resuming after {}", latest.run_id, latest.stage);
            latest
        }
        None => run_stage(ctx, Stage::Orchestrator, run_id)?,
    };
    let run_id = latest.run_id.clone();
    let from = latest.stage;

    let mut window_exhausted = latest.cursor.is_none() && !latest.has_more_posts;
    if from <= Stage::Fetcher {
        loop {
            let report = fetcher::run(ctx, &run_id)
                .inspect_err(|e| record_failure(ctx, &run_id, Stage::Fetcher, e))?;
            if let Some(outcome) = &report.outcome {
                window_exhausted = outcome.exhausted;
            }
            if report.is_complete() {
                break;
            }
            if ctx.shutdown.load(Ordering::Relaxed) {
                bail!("{run_id}: interrupted during fetch; resume with the same run id");
            }
        }
    }

    for stage in [Stage::Analyzer, Stage::Aggregator, Stage::Poster] {
        if stage >= from {
            run_stage(ctx, stage, Some(&run_id))?;
        }
    }

    let state = ctx.stores.runs.get_latest_run(&run_id)?;
    let summary = Summary {
        run_id,
        fetch_invocations: state.fetch_invocations,
        posts: state.post_count,
        window_exhausted,
        sentiment: state.summary.sentiment,
        published_ref: state.summary.published_ref,
        elapsed: start.elapsed(),
    };
    log::info!(
        "{}: done in {:.1}s ({} posts over {} fetch invocations)",
        summary.run_id,
        summary.elapsed.as_secs_f64(),
        summary.posts,
        summary.fetch_invocations
    );
    Ok(summary)
}
