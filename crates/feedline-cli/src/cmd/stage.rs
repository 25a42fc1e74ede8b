//! `feedline stage` - one stateless stage invocation

use anyhow::{Result, bail};
use clap::Args;
use feedline_pipeline::run_stage;
use feedline_store::Stage;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StageArgs {
    /// Stage to invoke (orchestrator|first, fetcher|fetch, analyzer, aggregator, poster)
    pub stage: String,

    /// Run to act on; the orchestrator derives one from the clock when omitted
    #[arg(long)]
    pub run_id: Option<String>,
}

pub fn run(args: StageArgs, config: &Config) -> Result<()> {
    let Some(stage) = Stage::from_name(&args.stage) else {
        bail!("unknown stage '{}'", args.stage);
    };
    let ctx = super::build_context(config)?;
    let state = run_stage(&ctx, stage, args.run_id.as_deref())?;

    // Machine-readable handoff for whatever schedules the next invocation.
    println!("{} {} {}", state.run_id, state.stage, state.status);
    Ok(())
}
