//! `feedline run` - drive a run through every stage

use anyhow::Result;
use clap::Args;
use feedline_pipeline::run_pipeline;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Resume this run, or create it under this id
    #[arg(long)]
    pub run_id: Option<String>,

    /// Compute everything but do not publish
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: RunArgs, config: &Config) -> Result<()> {
    let mut ctx = super::build_context(config)?;
    if args.dry_run {
        ctx.config.dry_run = true;
    }

    let summary = run_pipeline(&ctx, args.run_id.as_deref())?;

    eprintln!();
    eprintln!("Run:          {}", summary.run_id);
    eprintln!(
        "Posts:        {} ({} fetch invocations{})",
        summary.posts,
        summary.fetch_invocations,
        if summary.window_exhausted {
            ""
        } else {
            ", window not exhausted"
        }
    );
    match &summary.sentiment {
        Some(s) => eprintln!(
            "Sentiment:    {:+.2} ({} positive / {} negative / {} neutral)",
            s.average, s.positive, s.negative, s.neutral
        ),
        None => eprintln!("Sentiment:    -"),
    }
    eprintln!(
        "Published:    {}",
        summary.published_ref.as_deref().unwrap_or("no (dry run)")
    );
    eprintln!("Elapsed:      {:.1}s", summary.elapsed.as_secs_f64());
    Ok(())
}
