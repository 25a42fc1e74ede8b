//! First stage: create the run and fix its window

use anyhow::{Context as _, Result};
use feedline_core::Clock;
use feedline_store::{RunState, RunStatus, Stage, run_id_for};

use crate::context::Context;

/// Create a run. Without an id one is derived from the clock.
pub fn run(ctx: &Context, run_id: Option<&str>) -> Result<RunState> {
    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => run_id_for(ctx.clock.now()),
    };
    ctx.stores
        .runs
        .create_run(&run_id, ctx.config.interval_minutes)
        .with_context(|| format!("failed to create run {run_id}"))?;
    let state = ctx
        .stores
        .runs
        .modify(&run_id, Stage::Orchestrator, |s| {
            s.status = RunStatus::Complete;
            Ok(())
        })?;
    log::info!(
        "{run_id}: window {} .. {}",
        state.cutoff_time.to_rfc3339(),
        state.created_at.to_rfc3339()
    );
    Ok(state)
}
