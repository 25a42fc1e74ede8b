//! Logging setup for stage invocations

use std::io::Write;

/// Padded label for a log level.
fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

/// Default filter for the given verbosity flags.
fn default_level(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the default level. With `timestamps` each line is
/// prefixed with an RFC 3339 time; hosts that stamp lines themselves (log
/// collectors) should pass `false`.
pub fn init_logging(quiet: bool, debug: bool, timestamps: bool) {
    let env = env_logger::Env::default().default_filter_or(default_level(quiet, debug));
    let mut builder = env_logger::Builder::from_env(env);
    if timestamps {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                level_label(record.level()),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| {
            writeln!(buf, "[{}] {}", level_label(record.level()), record.args())
        });
    }
    // A second init (tests, embedded hosts) keeps the first logger.
    let _ = builder.try_init();
}
