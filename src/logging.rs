//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file output.
//! The library itself only emits `tracing` events; embedding applications call
//! [`init_logging`] once at startup.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter, the log file cannot
/// be opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use salesdesk::config::LoggingConfig;
/// use salesdesk::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     json_format: true,
///     file_path: None,
/// };
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json_format {
        let stdout_layer = fmt::layer().json().with_current_span(true);
        match file {
            Some(file) => registry
                .with(stdout_layer)
                .with(fmt::layer().json().with_current_span(true).with_writer(file))
                .try_init()?,
            None => registry.with(stdout_layer).try_init()?,
        }
    } else {
        let stdout_layer = fmt::layer().with_target(true).with_level(true);
        match file {
            Some(file) => registry
                .with(stdout_layer)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(file),
                )
                .try_init()?,
            None => registry.with(stdout_layer).try_init()?,
        }
    }

    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}
