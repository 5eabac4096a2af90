//! Bridge Configuration Module
//!
//! Loads [`BridgeConfig`] from an optional TOML file with environment
//! overrides layered on top.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable prefix, e.g. `P2P_BRIDGE_READ_BUFFER_SIZE=8192`
pub const ENV_PREFIX: &str = "P2P_BRIDGE";

/// Log output format
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Runtime settings for the bridge
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bytes returned by at most one `stream_read` call
    pub read_buffer_size: usize,

    /// Cap on option / bootnode lists; extra elements are dropped
    pub max_list_len: usize,

    /// Long-running foreign calls allowed in flight at once
    pub max_blocking_calls: usize,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            max_list_len: defaults::MAX_LIST_LEN,
            max_blocking_calls: defaults::MAX_BLOCKING_CALLS,
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from `path` (if given) with `P2P_BRIDGE_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Defaults plus `P2P_BRIDGE_*` overrides
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading bridge config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Bridge configuration loaded");
        Ok(config)
    }

    /// Reject settings the bridge cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be greater than zero");
        }
        if self.max_list_len == 0 {
            bail!("max_list_len must be greater than zero");
        }
        if self.max_blocking_calls == 0 {
            bail!("max_blocking_calls must be greater than zero");
        }
        Ok(())
    }
}
