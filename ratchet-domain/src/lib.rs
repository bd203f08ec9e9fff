//! Ratchet Domain Layer
//!
//! Pure domain types with zero I/O dependencies: value objects, per-symbol
//! risk parameters, the position entity and its take-profit ladder.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ladder;
pub mod position;
pub mod risk;
pub mod value_objects;

pub use ladder::{LadderConfig, TakeProfitLadder, TakeProfitLevel};
pub use position::{Position, PositionId, StopLossEvent, StopSource, StopState};
pub use risk::RiskParameters;
pub use value_objects::{DomainError, OrderSide, Price, Quantity, Side, Symbol};
