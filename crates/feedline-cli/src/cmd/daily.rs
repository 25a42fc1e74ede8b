//! `feedline daily` - per-day rollup of observations

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use feedline_store::DailyAggregate;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct DailyArgs {
    /// Day to show (YYYY-MM-DD)
    pub date: String,

    /// Compute the aggregate when it does not exist yet
    #[arg(long)]
    pub compute: bool,
}

pub fn run(args: DailyArgs, config: &Config) -> Result<()> {
    let date = NaiveDate::parse_from_str(&args.date, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", args.date))?;
    let stores = super::open_stores(config, super::system_clock())?;

    let aggregate = if args.compute {
        stores.series.compute_daily_aggregate(date)?
    } else {
        stores.series.get_daily(date)?
    };

    match aggregate {
        Some(aggregate) => eprintln!("\n{}", aggregate_table(&aggregate)),
        None if args.compute => eprintln!("No observations on {date}"),
        None => eprintln!("No aggregate for {date}; pass --compute to build it"),
    }
    Ok(())
}

fn aggregate_table(aggregate: &DailyAggregate) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Metric").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Date".to_string(), aggregate.date.to_string()]);
    table.add_row(vec!["Runs".to_string(), aggregate.observations.to_string()]);
    table.add_row(vec!["Posts".to_string(), aggregate.items.to_string()]);
    table.add_row(vec!["Average".to_string(), format!("{:+.3}", aggregate.average)]);
    table.add_row(vec!["Min".to_string(), format!("{:+.3}", aggregate.min)]);
    table.add_row(vec!["Max".to_string(), format!("{:+.3}", aggregate.max)]);
    table.add_row(vec![
        "Computed".to_string(),
        aggregate.computed_at.to_rfc3339(),
    ]);
    table
}
