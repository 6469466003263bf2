//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Route output to stdout or to the rotating log file
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - File output has ANSI colours disabled

use std::sync::Arc;

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::logfile::RotatingFile;

/// Filter directives for `level` when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    let level = if level.trim().is_empty() { "info" } else { level.trim() };
    format!("aileron_gateway={},tower_http={}", level, level)
}

fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)))
}

/// Install the global subscriber. Logs go to `file` when given, stdout otherwise.
pub fn init(config: &ObservabilityConfig, file: Option<Arc<RotatingFile>>) -> Result<(), TryInitError> {
    let (stdout_layer, file_layer) = match file {
        Some(file) => (None, Some(fmt::layer().with_ansi(false).with_writer(file))),
        None => (Some(fmt::layer()), None),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives("debug"), "aileron_gateway=debug,tower_http=debug");
        assert_eq!(default_directives(""), "aileron_gateway=info,tower_http=info");
    }
}
