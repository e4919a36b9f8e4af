//! Tracing subscriber setup
//!
//! Console output always; a daily rolling file when `logging.log_to_file` is set.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Build the filter from the environment, falling back to the configured level
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.level.trim();
        if level.contains('=') || level.contains(',') {
            EnvFilter::new(level)
        } else {
            EnvFilter::new(format!("{level},livenode={level},redis=warn"))
        }
    })
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive for
/// the lifetime of the process or buffered lines are lost on exit.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = build_filter(config);

    let mut guard = None;
    let file_layer = if config.log_to_file {
        // `rolling::daily` panics if it cannot create the first file, so preflight the directory.
        match std::fs::create_dir_all(&config.log_file_path) {
            Ok(()) => {
                let file_appender =
                    tracing_appender::rolling::daily(&config.log_file_path, "livenode.log");
                let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(file_guard);

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .boxed(),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory {} ({}), file logging disabled",
                    config.log_file_path, e
                );
                None
            }
        }
    } else {
        None
    };

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    if tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        eprintln!("Warning: a global tracing subscriber is already installed");
    }

    if file_logging_enabled {
        eprintln!("Logging to: {}/livenode.log", config.log_file_path);
    }

    guard
}

/// Minimal logging for CLI commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
