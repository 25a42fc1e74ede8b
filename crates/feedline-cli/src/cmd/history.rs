//! `feedline history` - recent per-run observations

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// How far back to look, in hours
    #[arg(long, default_value_t = 24)]
    pub hours: i64,
}

pub fn run(args: HistoryArgs, config: &Config) -> Result<()> {
    let stores = super::open_stores(config, super::system_clock())?;
    let history = stores
        .series
        .get_history(chrono::Duration::hours(args.hours))?;

    if history.is_empty() {
        eprintln!("No observations in the last {}h", args.hours);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Time").fg(Color::Cyan),
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Mood").fg(Color::Cyan),
            Cell::new("Posts").fg(Color::Cyan),
        ]);
    for obs in &history {
        table.add_row(vec![
            Cell::new(obs.timestamp.format("%Y-%m-%d %H:%M")),
            Cell::new(&obs.run_id),
            Cell::new(format!("{:+.2}", obs.value)),
            Cell::new(obs.count),
        ]);
    }
    eprintln!("\n{table}");
    Ok(())
}
