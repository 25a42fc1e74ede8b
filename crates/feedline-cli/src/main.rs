//! feedline - stateless, resumable feed summarization pipeline
//!
//! Each invocation runs one stage (or drives a whole run) against the
//! state kept in the store directory, so a run survives being split across
//! many short-lived processes.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "feedline")]
#[command(about = "Stateless, resumable feed summarization pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Prefix log lines with a timestamp
    #[arg(long, global = true)]
    timestamps: bool,

    /// Config file path (default: ./feedline.toml or ~/.config/feedline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    store_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a single stage
    Stage(cmd::stage::StageArgs),
    /// Drive a run through every stage
    Run(cmd::run::RunArgs),
    /// Show the stage rows of a run
    Status(cmd::status::StatusArgs),
    /// Show recent observations
    History(cmd::history::HistoryArgs),
    /// Show or compute a daily aggregate
    Daily(cmd::daily::DailyArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    feedline_core::init_logging(cli.quiet, cli.debug, cli.timestamps);
    if let Err(e) = feedline_core::install_signal_handlers() {
        log::warn!("Could not install signal handlers: {e}");
    }

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(dir) = cli.store_dir {
        config.store.dir = dir;
    }

    match cli.command {
        Command::Stage(args) => cmd::stage::run(args, &config),
        Command::Run(args) => cmd::run::run(args, &config),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::History(args) => cmd::history::run(args, &config),
        Command::Daily(args) => cmd::daily::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Store directory",
                &config.store.dir.display().to_string(),
            ]);
            match &config.feed.fixture {
                Some(path) => table.add_row(vec!["Feed fixture", &path.display().to_string()]),
                None => table.add_row(vec!["Feed URL", &config.feed.base_url]),
            };
            table.add_row(vec!["Query", &config.feed.query]);
            table.add_row(vec![
                "Feed token",
                if config.feed.token.is_some() {
                    "configured"
                } else {
                    "not set"
                },
            ]);
            table.add_row(vec![
                "Interval",
                &format!("{} min", config.run.interval_minutes),
            ]);
            table.add_row(vec![
                "Page size",
                &format!(
                    "{} (max {} pages per invocation)",
                    config.fetch.page_size, config.fetch.max_iterations
                ),
            ]);
            table.add_row(vec![
                "Time budget",
                &format!(
                    "{}s (margin {}s)",
                    config.fetch.time_budget, config.fetch.safety_margin
                ),
            ]);
            table.add_row(vec![
                "Fetch invocations",
                &config.run.max_fetch_invocations.to_string(),
            ]);
            table.add_row(vec!["Batch size", &config.run.batch_size.to_string()]);
            table.add_row(vec![
                "Publish to",
                config.publish.webhook_url.as_deref().unwrap_or("log"),
            ]);
            table.add_row(vec!["Dry run", &config.run.dry_run.to_string()]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
