//! Tracing subscriber setup for the binary
//!
//! `RUST_LOG` wins over the configured level when set.

use crate::config::{LogConfig, LogFormat};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter for a log configuration
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level: {}", config.level)),
    }
}

/// Install the global subscriber
pub fn init_subscriber(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output
    let result = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.context("Failed to initialize tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "strand=loud".to_string(),
            format: LogFormat::Compact,
        };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn test_directive_level() {
        let config = LogConfig {
            level: "strand=debug,strand_plugin_host=trace".to_string(),
            format: LogFormat::Json,
        };
        assert!(env_filter(&config).is_ok());
    }
}
