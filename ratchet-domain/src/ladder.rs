//! Take-Profit Ladder State
//!
//! Staged partial exits placed at fixed multiples of the initial risk.
//!
//! # Layout (default ladder)
//!
//! ```text
//! risk = |entry - initial_stop|
//!
//! level 1: 30% @ entry ± 1R  → floor = entry (breakeven)
//! level 2: 30% @ entry ± 2R  → floor = level 1 target
//! level 3: 40% @ entry ± 3R  → floor = level 2 target
//! ```
//!
//! Targets are fixed when the ladder is built. Rungs fire strictly in
//! order and each rung fires at most once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{DomainError, Price, Quantity, Side};

// =============================================================================
// Ladder Configuration
// =============================================================================

/// R-multiples and close fractions for each rung.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Risk multiples, strictly ascending
    pub ratios: Vec<Decimal>,
    /// Fraction of the original quantity closed at each rung
    pub percentages: Vec<Decimal>,
}

impl LadderConfig {
    /// Validate the rung layout.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLadder` on mismatched lengths, non-ascending
    /// ratios, non-positive fractions, or fractions summing above 1.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.ratios.is_empty() || self.ratios.len() != self.percentages.len() {
            return Err(DomainError::InvalidLadder(format!(
                "{} ratios vs {} percentages",
                self.ratios.len(),
                self.percentages.len()
            )));
        }

        if self.ratios.iter().any(|r| *r <= Decimal::ZERO) {
            return Err(DomainError::InvalidLadder("ratios must be positive".to_string()));
        }

        if self.ratios.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DomainError::InvalidLadder(
                "ratios must be strictly ascending".to_string(),
            ));
        }

        if self.percentages.iter().any(|p| *p <= Decimal::ZERO) {
            return Err(DomainError::InvalidLadder("percentages must be positive".to_string()));
        }

        let total: Decimal = self.percentages.iter().sum();
        if total > Decimal::ONE {
            return Err(DomainError::InvalidLadder(format!(
                "percentages sum to {total}, more than the whole position"
            )));
        }

        Ok(())
    }
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            ratios: vec![Decimal::ONE, Decimal::TWO, Decimal::new(3, 0)],
            percentages: vec![Decimal::new(30, 2), Decimal::new(30, 2), Decimal::new(40, 2)],
        }
    }
}

// =============================================================================
// Take-Profit Level
// =============================================================================

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// 1-based rung index
    pub level: u32,
    /// R-multiple of the initial risk
    pub risk_reward_ratio: Decimal,
    /// Fraction of the original quantity to close
    pub close_percentage: Decimal,
    /// Price at which this rung fires
    pub target_price: Price,
    /// Stop floor installed once this rung fires
    pub new_stop_loss: Price,
    /// Whether the partial close went through
    pub executed: bool,
    /// When the partial close filled
    pub executed_at: Option<DateTime<Utc>>,
    /// Fill price of the partial close
    pub executed_price: Option<Price>,
}

impl TakeProfitLevel {
    /// Whether `price` has reached this rung's target.
    pub fn is_reached(&self, side: Side, price: Price) -> bool {
        match side {
            Side::Long => price >= self.target_price,
            Side::Short => price <= self.target_price,
        }
    }
}

// =============================================================================
// Take-Profit Ladder
// =============================================================================

/// Ladder attached to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLadder {
    /// |entry - initial stop| at build time
    pub risk_distance: Decimal,
    /// Rungs ordered by level
    pub levels: Vec<TakeProfitLevel>,
}

impl TakeProfitLadder {
    /// Compute rung targets and floors.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ratchet_domain::ladder::{LadderConfig, TakeProfitLadder};
    /// # use ratchet_domain::value_objects::{Price, Side};
    /// # use rust_decimal_macros::dec;
    /// let ladder = TakeProfitLadder::build(
    ///     Side::Long,
    ///     Price::new(dec!(50000)).unwrap(),
    ///     Price::new(dec!(48750)).unwrap(),
    ///     &LadderConfig::default(),
    /// )
    /// .unwrap();
    ///
    /// let targets: Vec<_> = ladder.levels.iter().map(|l| l.target_price.as_decimal()).collect();
    /// assert_eq!(targets, vec![dec!(51250), dec!(52500), dec!(53750)]);
    /// assert_eq!(ladder.levels[0].new_stop_loss.as_decimal(), dec!(50000));
    /// assert_eq!(ladder.levels[2].new_stop_loss.as_decimal(), dec!(52500));
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLadder` if the config is invalid, the
    /// risk distance is zero, or a short target would fall to or below zero.
    pub fn build(
        side: Side,
        entry_price: Price,
        initial_stop: Price,
        config: &LadderConfig,
    ) -> Result<Self, DomainError> {
        config.validate()?;

        let entry = entry_price.as_decimal();
        let risk_distance = (entry - initial_stop.as_decimal()).abs();
        if risk_distance.is_zero() {
            return Err(DomainError::InvalidLadder(
                "initial stop equals entry, no risk to scale targets from".to_string(),
            ));
        }

        let mut levels: Vec<TakeProfitLevel> = Vec::with_capacity(config.ratios.len());
        for (idx, (ratio, pct)) in config.ratios.iter().zip(&config.percentages).enumerate() {
            let target = entry + side.sign() * risk_distance * *ratio;
            let target_price = Price::new(target).map_err(|_| {
                DomainError::InvalidLadder(format!("level {} target {} is not a price", idx + 1, target))
            })?;

            // Rung 1 locks breakeven, later rungs lock the previous target.
            let new_stop_loss = match levels.last() {
                Some(prev) => prev.target_price,
                None => entry_price,
            };

            levels.push(TakeProfitLevel {
                level: (idx + 1) as u32,
                risk_reward_ratio: *ratio,
                close_percentage: *pct,
                target_price,
                new_stop_loss,
                executed: false,
                executed_at: None,
                executed_price: None,
            });
        }

        Ok(Self {
            risk_distance,
            levels,
        })
    }

    /// Index of the next rung to fire, if any remain.
    pub fn next_pending(&self) -> Option<usize> {
        self.levels.iter().position(|l| !l.executed)
    }

    /// Index of the next rung if `price` has reached it.
    ///
    /// Only the lowest unexecuted rung is ever considered, so rungs can
    /// never fire out of order.
    pub fn due_level(&self, side: Side, price: Price) -> Option<usize> {
        self.next_pending().filter(|&idx| self.levels[idx].is_reached(side, price))
    }

    /// Whether `idx` is the last rung still pending.
    pub fn is_final_pending(&self, idx: usize) -> bool {
        self.levels.iter().enumerate().all(|(i, l)| i == idx || l.executed)
    }

    /// Quantity to close at rung `idx`.
    ///
    /// Rungs are sized off the original quantity; the final pending rung
    /// closes whatever is left so the position ends at exactly zero.
    pub fn close_quantity(&self, idx: usize, original: Quantity, remaining: Quantity) -> Quantity {
        if self.is_final_pending(idx) {
            return remaining;
        }

        let sized = original.as_decimal() * self.levels[idx].close_percentage;
        Quantity::new(sized.min(remaining.as_decimal())).unwrap_or(remaining)
    }

    /// Record a filled rung.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStateTransition` if the rung already
    /// fired or an earlier rung is still pending.
    pub fn mark_executed(
        &mut self,
        idx: usize,
        fill_price: Price,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.next_pending() != Some(idx) {
            return Err(DomainError::InvalidStateTransition(format!(
                "take-profit level {} is not the next pending rung",
                idx + 1
            )));
        }

        let level = &mut self.levels[idx];
        level.executed = true;
        level.executed_at = Some(at);
        level.executed_price = Some(fill_price);
        Ok(())
    }

    /// Floor from the highest executed rung, `None` before the first fires.
    pub fn floor(&self) -> Option<Price> {
        self.levels.iter().take_while(|l| l.executed).last().map(|l| l.new_stop_loss)
    }

    /// Every rung has fired.
    pub fn is_complete(&self) -> bool {
        self.levels.iter().all(|l| l.executed)
    }

    /// Rungs fired so far.
    pub fn executed_count(&self) -> usize {
        self.levels.iter().filter(|l| l.executed).count()
    }

    /// Human-readable rung summary, e.g. `L1 done, L2 pending, L3 pending`.
    pub fn status(&self) -> String {
        self.levels
            .iter()
            .map(|l| format!("L{} {}", l.level, if l.executed { "done" } else { "pending" }))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =============================================================================
// Tests
// =============================================================================
