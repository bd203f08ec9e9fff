//! Daemon error types.

use ratchet_domain::{DomainError, Price, Side, Symbol};
use ratchet_engine::EngineError;
use ratchet_exec::ExecError;
use thiserror::Error;

/// Daemon-level errors.
///
/// An unknown symbol is not an error: stray ticks for closed positions are
/// reported through the outcome types instead.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Proposed stop does not tighten the committed one
    #[error("Stop for {side} {symbol} cannot move from {current} to {proposed}")]
    InvalidDirection {
        /// Position symbol
        symbol: Symbol,
        /// Position side
        side: Side,
        /// Committed stop
        current: Price,
        /// Rejected proposal
        proposed: Price,
    },

    /// Proposal sits beyond the take-profit floor and the floor is already in force
    #[error("Stop {proposed} for {symbol} is beyond take-profit floor {floor}")]
    BelowFloor {
        /// Position symbol
        symbol: Symbol,
        /// Rejected proposal
        proposed: Price,
        /// Active floor
        floor: Price,
    },

    /// A gateway call failed
    #[error("Gateway {operation} failed for {symbol}: {source}")]
    Gateway {
        /// Gateway operation name
        operation: &'static str,
        /// Position symbol
        symbol: Symbol,
        /// Underlying error
        #[source]
        source: ExecError,
    },

    /// The position is open with no resting stop order
    #[error("PROTECTION LOST for {symbol}: no resting stop order ({source})")]
    ProtectionLost {
        /// Position symbol
        symbol: Symbol,
        /// Placement failure
        #[source]
        source: ExecError,
    },

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl DaemonError {
    /// Whether the failure leaves a position without protection.
    pub fn is_urgent(&self) -> bool {
        matches!(self, DaemonError::ProtectionLost { .. })
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
