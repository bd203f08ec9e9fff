//! Ratchet Engine
//!
//! Pure stop-loss arithmetic and the per-symbol parameter lookup that
//! drives it. No I/O beyond loading a parameter file at startup.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod params;
pub mod stops;
pub mod trailing;

pub use error::{EngineError, EngineResult};
pub use params::RiskParameterStore;
pub use trailing::{decide_trailing, TrailingDecision, TrailingInput};
