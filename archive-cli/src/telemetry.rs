//! Logging setup: env filter, console layer and optional rolling file

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use archive::config::LoggingConfig;

/// Keeps the file writer flushing until dropped
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level; `verbosity` raises the
/// configured level by one step per `-v`.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<TelemetryGuard> {
    let level = raise_level(&config.level, verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,archive={}", level)));

    let console_json = config.json.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
    });
    let console_plain = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let (file_layer, guard) = match &config.file {
        Some(log_path) => {
            let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)
                .with_context(|| format!("cannot create log directory {}", directory.display()))?;
            let file_name = log_path.file_name().unwrap_or_else(|| OsStr::new("archive.log"));

            let appender = match config.rotation.as_str() {
                "daily" => rolling::daily(directory, file_name),
                "hourly" => rolling::hourly(directory, file_name),
                _ => rolling::never(directory, file_name),
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .json()
                .with_current_span(true)
                .with_span_list(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_plain)
        .with(file_layer)
        .try_init()
        .context("cannot install the log subscriber")?;

    Ok(TelemetryGuard { _file_guard: guard })
}

fn raise_level(level: &str, verbosity: u8) -> &'static str {
    const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    let base = LEVELS
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(level))
        .unwrap_or(2);
    LEVELS[(base + verbosity as usize).min(LEVELS.len() - 1)]
}
