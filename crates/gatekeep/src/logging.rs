//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context as _, Result};
use gatekeep_config::{LogFormat, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter directives: `RUST_LOG` wins, then `--verbose`, then the config's level.
fn filter_directives(config: &LoggingConfig, verbose: bool, env: Option<String>) -> String {
    match env.filter(|v| !v.trim().is_empty()) {
        Some(directives) => directives,
        None if verbose => "debug".to_string(),
        None => match config.level.trim() {
            "" => "info".to_string(),
            "warning" => "warn".to_string(),
            "critical" => "error".to_string(),
            level => level.to_string(),
        },
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop and must live as long as `main`.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let directives = filter_directives(config, verbose, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter '{}'", directives))?;

    let (file_layer, guard) = match &config.filename {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log filename '{}' has no file name", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (standard, json) = match config.format {
        LogFormat::Standard => (Some(tracing_subscriber::fmt::layer().with_target(true)), None),
        LogFormat::Json => (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(standard)
        .with(json)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
