//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur while talking to the venue or the data feed.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Exchange communication error
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Order was rejected by exchange
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Market data unavailable or malformed
    #[error("Market data error: {0}")]
    MarketData(String),

    /// Call did not complete before its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Call was abandoned because shutdown was requested
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] ratchet_domain::DomainError),
}

impl ExecError {
    /// Whether the call may have reached the venue but its result is unknown.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ExecError::Timeout(_) | ExecError::Cancelled(_))
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
