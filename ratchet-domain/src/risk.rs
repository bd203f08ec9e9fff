//! Per-symbol risk parameters.
//!
//! One `RiskParameters` set drives every stop computed for a symbol:
//! ATR multipliers for the initial and trailing stop, the minimum change
//! that justifies replacing a resting order, and the allowed band for the
//! stop distance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::DomainError;

/// Stop-loss parameters for one symbol. Immutable after load.
///
/// Percentages are expressed in percent units (`0.3` means 0.3 %).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// ATR lookback for the initial stop
    pub initial_atr_period: u32,
    /// Initial stop = entry ± multiplier × ATR
    pub initial_atr_multiplier: Decimal,
    /// ATR lookback for the trailing stop
    pub trailing_atr_period: u32,
    /// Trailing stop = extreme ± multiplier × ATR
    pub trailing_atr_multiplier: Decimal,
    /// Minimum % change before a new stop replaces the resting order
    pub update_threshold_pct: Decimal,
    /// Tightest allowed stop distance, % of reference price
    pub min_stop_distance_pct: Decimal,
    /// Widest allowed stop distance, % of reference price
    pub max_stop_distance_pct: Decimal,
}

impl RiskParameters {
    /// Same multipliers and threshold for every built-in symbol; only the
    /// maximum stop distance differs with volatility.
    pub fn with_max_distance(max_stop_distance_pct: Decimal) -> Self {
        Self {
            max_stop_distance_pct,
            ..Self::default()
        }
    }

    /// Validate internal consistency.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRiskParameters` when a period or
    /// multiplier is not positive, the threshold is negative, or the
    /// distance band is inverted.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.initial_atr_period == 0 || self.trailing_atr_period == 0 {
            return Err(DomainError::InvalidRiskParameters(
                "ATR periods must be at least 1".to_string(),
            ));
        }

        if self.initial_atr_multiplier <= Decimal::ZERO
            || self.trailing_atr_multiplier <= Decimal::ZERO
        {
            return Err(DomainError::InvalidRiskParameters(
                "ATR multipliers must be positive".to_string(),
            ));
        }

        if self.update_threshold_pct < Decimal::ZERO {
            return Err(DomainError::InvalidRiskParameters(
                "Update threshold cannot be negative".to_string(),
            ));
        }

        if self.min_stop_distance_pct < Decimal::ZERO
            || self.min_stop_distance_pct > self.max_stop_distance_pct
        {
            return Err(DomainError::InvalidRiskParameters(format!(
                "Stop distance band [{}, {}] is invalid",
                self.min_stop_distance_pct, self.max_stop_distance_pct
            )));
        }

        Ok(())
    }
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            initial_atr_period: 3,
            initial_atr_multiplier: Decimal::new(25, 1),  // 2.5
            trailing_atr_period: 3,
            trailing_atr_multiplier: Decimal::new(25, 1), // 2.5
            update_threshold_pct: Decimal::new(3, 1),     // 0.3%
            min_stop_distance_pct: Decimal::new(5, 1),    // 0.5%
            max_stop_distance_pct: Decimal::new(5, 0),    // 5%
        }
    }
}
