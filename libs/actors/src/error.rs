//! Runtime Error Types

use thiserror::Error;

/// Errors raised by the embedding runtime itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// No tokio executor is available to schedule processes on
    #[error("No executor available: {message}")]
    NoExecutor { message: String },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a missing-executor error
    pub fn no_executor(message: impl Into<String>) -> Self {
        Self::NoExecutor {
            message: message.into(),
        }
    }
}
