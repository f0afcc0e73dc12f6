//! Logging setup with daily file rotation.
//!
//! ```no_run
//! use llmgate_core::logging::init_logging;
//!
//! init_logging("logs", "llmgate.log", "info").unwrap();
//! ```

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize a console + daily-rotated-file tracing subscriber.
///
/// - `directory`: where log files are written
/// - `filename_prefix`: prefix for each day's log file
/// - `level`: default filter level, overridden by `RUST_LOG` if set
pub fn init_logging(directory: &str, filename_prefix: &str, level: &str) -> Result<()> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename_prefix)
        .build(directory)
        .map_err(|e| anyhow::anyhow!("failed to create log appender: {e}"))?;

    let console_layer = fmt::layer().with_target(false).compact();
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;

    Ok(())
}
