//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur talking to external services.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Chain RPC communication error
    #[error("Chain error: {0}")]
    Chain(String),

    /// Transaction did not reach the required confirmations in time
    #[error("Chain confirmation timeout for tx {0}")]
    ChainTimeout(String),

    /// Notification delivery failure
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
