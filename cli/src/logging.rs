//! Logging initialization
//!
//! Compact logs to stderr, filtered by `RUST_LOG` (default `warn`, `debug`
//! with `-v`). With `--log-dir`, JSON logs also go to a daily rolling file.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held until
/// exit.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init()
            .context("Failed to install logger")?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir).context("Failed to create log directory")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "proxima");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install logger")?;

    Ok(Some(guard))
}
