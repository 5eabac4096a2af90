//! Bridge Error Types
//!
//! Every synchronous failure is recovered at the façade boundary as one of
//! these and surfaces to the caller as `{error, message}`. Asynchronous
//! delivery failures never become errors; the dispatcher absorbs them.

use crate::handle::HandleType;
use actor_runtime::Term;
use thiserror::Error;

/// Main bridge error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Zero handle, or a handle that can no longer be used
    #[error("invalid {kind}: {reason}")]
    InvalidHandle { kind: HandleType, reason: String },

    /// A wrapper of one declared type used where another was required
    #[error("invalid {expected}: got a {found} handle")]
    TypeMismatch {
        expected: HandleType,
        found: HandleType,
    },

    /// Malformed argument shape, including non-wrapper values
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The foreign library reported failure through a sentinel
    #[error("{operation} failed: {message}")]
    ForeignCall { operation: String, message: String },

    /// The caller's process identity could not be captured
    #[error("failed to get pid: not called from a runtime process")]
    NoProcess,

    /// The wrapper was closed through the bridge
    #[error("{kind} is closed")]
    Closed { kind: HandleType },

    /// The blocking worker pool failed to run the call
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn invalid_handle(kind: HandleType, reason: impl Into<String>) -> Self {
        Self::InvalidHandle {
            kind,
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(expected: HandleType, found: HandleType) -> Self {
        Self::TypeMismatch { expected, found }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn foreign_call(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ForeignCall {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn closed(kind: HandleType) -> Self {
        Self::Closed { kind }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidHandle { .. } | Self::TypeMismatch { .. } => "invalid_handle",
            Self::InvalidArgument { .. } => "argument_decoding",
            Self::ForeignCall { .. } => "foreign_call",
            Self::NoProcess => "no_process",
            Self::Closed { .. } => "closed",
            Self::Runtime { .. } => "runtime",
        }
    }

    /// `{error, message}` term for the caller
    pub fn to_term(&self) -> Term {
        Term::error_tuple(self.to_string())
    }
}
