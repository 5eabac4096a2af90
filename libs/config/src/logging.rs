//! Logging initialisation

use crate::bridge_config::{BridgeConfig, LogFormat};
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Returns `false` when
/// a subscriber was already installed, which is not an error.
pub fn init_logging(config: &BridgeConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log level '{}'", config.log_level))?,
    };

    let installed = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(level = %config.log_level, format = ?config.log_format, "Logging initialised");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = BridgeConfig::default();

        let first = init_logging(&config).unwrap();
        let second = init_logging(&config).unwrap();

        assert!(first || !second);
        assert!(!second);
    }
}
