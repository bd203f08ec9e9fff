//! Engine errors.

use ratchet_domain::DomainError;
use thiserror::Error;

/// Errors raised while building engine state.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Parameter file could not be read
    #[error("Failed to read risk parameters: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter file is not valid JSON for the expected shape
    #[error("Malformed risk parameters: {0}")]
    Json(#[from] serde_json::Error),

    /// Parameter file lacks the fallback entry
    #[error("Risk parameters must contain a DEFAULT entry")]
    MissingDefault,

    /// A parameter set failed validation
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
