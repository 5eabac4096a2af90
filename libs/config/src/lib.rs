//! # Bridge Configuration
//!
//! Centralised configuration and logging setup for the libp2p bridge.
//!
//! ## Features
//!
//! - **Defaults**: transfer buffer size, list caps, blocking-call limits
//! - **Layered loading**: optional TOML file, then `P2P_BRIDGE_*` environment
//! - **Logging**: one-call `tracing-subscriber` installation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bridge_config::{init_logging, BridgeConfig};
//!
//! let config = BridgeConfig::load(None).expect("configuration");
//! init_logging(&config).expect("logging");
//! assert_eq!(config.read_buffer_size, 4096);
//! ```

pub mod bridge_config;
pub mod defaults;
pub mod logging;

// Re-export commonly used types
pub use bridge_config::{BridgeConfig, LogFormat, ENV_PREFIX};
pub use logging::init_logging;
