//! Default configuration values
//!
//! Constants shared by the configuration loader and the bridge so that the
//! documented per-call contracts have a single source.

/// Bytes transferred per `stream_read` call
pub const READ_BUFFER_SIZE: usize = 4096;

/// Maximum elements forwarded from an option or bootnode list
pub const MAX_LIST_LEN: usize = 256;

/// Concurrent long-running foreign calls (stream I/O, negotiation, discovery)
pub const MAX_BLOCKING_CALLS: usize = 64;

/// Default `tracing` filter directive
pub const LOG_LEVEL: &str = "info";
