//! `feedline status` - per-stage rows of one run

use anyhow::{Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use feedline_store::{RunState, RunStatus};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run to show
    pub run_id: String,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let stores = super::open_stores(config, super::system_clock())?;
    let stages = stores.runs.list_stages(&args.run_id)?;
    let Some(latest) = stages.last() else {
        bail!("run {} not found", args.run_id);
    };

    eprintln!("\n{}", stage_table(&stages));
    eprintln!(
        "Window from {} ({} min), {} posts in {} batches",
        latest.cutoff_time.format("%Y-%m-%d %H:%M:%S UTC"),
        latest.interval_minutes,
        latest.post_count,
        stores.posts.batch_count(&args.run_id)?
    );
    if latest.has_more_posts {
        eprintln!(
            "More posts pending at cursor {}",
            latest.cursor.as_deref().unwrap_or("-")
        );
    }
    if let Some(sentiment) = &latest.summary.sentiment {
        eprintln!("Mood {:+.2} over {} posts", sentiment.average, sentiment.scored);
    }
    Ok(())
}

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Complete => Color::Green,
        RunStatus::InProgress => Color::Yellow,
        RunStatus::Failed => Color::Red,
        RunStatus::Pending => Color::Grey,
    }
}

fn stage_table(stages: &[RunState]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Stage").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Posts").fg(Color::Cyan),
            Cell::new("Fetches").fg(Color::Cyan),
            Cell::new("Updated").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
        ]);

    for state in stages {
        table.add_row(vec![
            Cell::new(state.stage),
            Cell::new(state.status).fg(status_color(state.status)),
            Cell::new(state.post_count),
            Cell::new(state.fetch_invocations),
            Cell::new(state.updated_at.format("%H:%M:%S")),
            Cell::new(state.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}
