//! Logging initialization.
//!
//! Console output always; an additional non-blocking file sink when
//! `[logging] file_dir` is set. `RUST_LOG` overrides the configured level.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

/// File name for a run started at `started`
pub fn log_file_name(started: DateTime<Utc>) -> String {
    format!("embedded-comm_{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber
///
/// The returned guard flushes the file sink on drop and must live as long as
/// the program. `None` when file logging is disabled.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(build_filter(&config.level))
        .boxed();

    let mut layers = vec![console_layer];
    let mut guard = None;

    if !config.file_dir.is_empty() {
        let path = prepare_log_file(Path::new(&config.file_dir), Utc::now())?;
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().unwrap_or_default();

        let (non_blocking, file_guard) =
            tracing_appender::non_blocking(rolling::never(directory, file_name));
        guard = Some(file_guard);

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_filter(build_filter(&config.level))
                .boxed(),
        );
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Create `dir` and return the log file path for a run started at `started`
fn prepare_log_file(dir: &Path, started: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    Ok(dir.join(log_file_name(started)))
}
