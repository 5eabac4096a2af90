//! Foreign Call Façade
//!
//! Typed entry points over the foreign library. Every operation follows
//! the same pattern:
//!
//! 1. Decode arguments: binaries stay raw bytes, handle arguments are
//!    unwrapped through the [`HandleRegistry`] with their expected type.
//! 2. Call the foreign function, inline for accessors or on the
//!    [`BlockingPool`] for anything that can stall on a peer.
//! 3. Translate sentinels (handle 0, count -1) into [`BridgeError`] values
//!    carrying the library's own description when it has one, and wrap
//!    fresh handles.
//!
//! Handle arguments are held as [`Resource`] clones for the duration of a
//! call, so a concurrent drop of the caller's term can never release a
//! handle that a blocking call is still using.

mod discovery;
mod host;
mod pubsub;
mod stream;

pub use host::PERMANENT_ADDR_TTL;

use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::foreign::ForeignLibrary;
use crate::handle::{HandleType, RawHandle, INVALID_HANDLE};
use crate::pool::BlockingPool;
use crate::registry::{HandleRegistry, Resource};
use actor_runtime::{Runtime, Term};
use bridge_config::BridgeConfig;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Bridge entry points bound to one foreign library and one runtime
#[derive(Clone)]
pub struct Libp2p {
    library: Arc<dyn ForeignLibrary>,
    registry: HandleRegistry,
    dispatcher: Dispatcher,
    pool: BlockingPool,
    config: Arc<BridgeConfig>,
}

impl Libp2p {
    pub fn new(library: Arc<dyn ForeignLibrary>, runtime: Runtime, config: BridgeConfig) -> Self {
        let registry = HandleRegistry::new(Arc::clone(&library));
        let dispatcher = Dispatcher::new(runtime, registry.clone());
        let pool = BlockingPool::new(config.max_blocking_calls);

        info!(
            read_buffer_size = config.read_buffer_size,
            max_list_len = config.max_list_len,
            max_blocking_calls = config.max_blocking_calls,
            "libp2p bridge initialized"
        );

        Self {
            library,
            registry,
            dispatcher,
            pool,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn resource(&self, term: &Term, kind: HandleType) -> Result<Resource> {
        self.registry.resource(term, kind)
    }

    /// Wrap a handle minted by `operation`, translating the 0 sentinel
    fn minted(&self, operation: &str, kind: HandleType, handle: RawHandle) -> Result<Resource> {
        minted(&self.registry, operation, kind, handle)
    }

    /// Bounded list argument; entries past the cap are dropped
    fn list_arg<'a>(&self, term: &'a Term, what: &str) -> Result<&'a [Term]> {
        let elements = term
            .as_list()
            .ok_or_else(|| BridgeError::invalid_argument(format!("{what} must be a list, got {}", term.type_name())))?;

        let cap = self.config.max_list_len;
        if elements.len() > cap {
            warn!(
                argument = what,
                given = elements.len(),
                forwarded = cap,
                "List argument truncated"
            );
            return Ok(&elements[..cap]);
        }
        Ok(elements)
    }
}

impl fmt::Debug for Libp2p {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Libp2p")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish()
    }
}

/// Raw bytes of a binary argument
fn binary_arg(term: &Term, what: &str) -> Result<Bytes> {
    term.as_binary()
        .cloned()
        .ok_or_else(|| BridgeError::invalid_argument(format!("{what} must be a binary, got {}", term.type_name())))
}

fn u64_arg(term: &Term, what: &str) -> Result<u64> {
    term.as_u64()
        .ok_or_else(|| BridgeError::invalid_argument(format!("{what} must be a non-negative integer")))
}

/// Failure of `operation`, described by the library if it left a message.
///
/// Must run on the thread that made the failing call.
fn failure(library: &dyn ForeignLibrary, operation: &str, fallback: &str) -> BridgeError {
    let message = library.last_error().unwrap_or_else(|| fallback.to_string());
    BridgeError::foreign_call(operation, message)
}

fn minted(registry: &HandleRegistry, operation: &str, kind: HandleType, handle: RawHandle) -> Result<Resource> {
    if handle == INVALID_HANDLE {
        return Err(failure(registry.library().as_ref(), operation, "invalid handle returned"));
    }
    registry.wrap(kind, handle)
}

/// Non-negative count, or the failure the -1 sentinel stands for
fn counted(library: &dyn ForeignLibrary, operation: &str, count: i64, fallback: &str) -> Result<usize> {
    usize::try_from(count).map_err(|_| failure(library, operation, fallback))
}

/// Copy a length-prefixed value out of the library
fn sized_copy(
    library: &dyn ForeignLibrary,
    operation: &str,
    len: i64,
    copy: impl FnOnce(&mut [u8]) -> i64,
) -> Result<Bytes> {
    let len = counted(library, operation, len, "failed to get length")?;
    let mut buffer = vec![0u8; len];
    let copied = counted(library, operation, copy(&mut buffer), "failed to copy")?;
    buffer.truncate(copied);
    Ok(Bytes::from(buffer))
}
