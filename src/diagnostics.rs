//! Tracing subscriber setup.
//!
//! Logs always go to stderr. When a log directory is configured, a second
//! layer writes daily-rolling files through a non-blocking writer whose
//! guard must outlive the process's logging.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{Result, WardenError};

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "warden.log";

/// `RUST_LOG` wins; otherwise `default`, falling back to `warden=info`.
#[must_use]
pub fn build_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("warden=info"))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; dropping it
/// flushes and stops the background writer.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(&config.filter))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| WardenError::Config(format!("cannot install tracing subscriber: {e}")))?;
    Ok(guard)
}
