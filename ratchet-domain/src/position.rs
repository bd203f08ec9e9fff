//! Position Entity
//!
//! One protected position per symbol, with its stop lifecycle and
//! append-only stop history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ladder::TakeProfitLadder;
use crate::value_objects::{DomainError, Price, Quantity, Side, Symbol};

/// Unique identifier for a Position
pub type PositionId = Uuid;

// =============================================================================
// Stop State Machine
// =============================================================================

/// Lifecycle of the protective stop.
///
/// ```text
/// Registered ──place──► Active ──replace──► Active
///      ▲                  │
///      └──replace failed──┤
///                         ▼
///                     Triggered ──close──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    /// Tracked, but no stop order rests at the venue
    Registered,
    /// A stop order rests at the venue
    Active,
    /// Price breached the stop, market close pending
    Triggered,
    /// Fully closed (terminal)
    Closed,
}

impl StopState {
    /// Name for logs
    pub fn name(&self) -> &'static str {
        match self {
            StopState::Registered => "registered",
            StopState::Active => "active",
            StopState::Triggered => "triggered",
            StopState::Closed => "closed",
        }
    }

    fn can_transition_to(self, next: StopState) -> bool {
        match self {
            StopState::Closed => false,
            StopState::Triggered => matches!(next, StopState::Triggered | StopState::Closed),
            StopState::Registered | StopState::Active => true,
        }
    }
}

impl fmt::Display for StopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who asked for a stop change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    /// Initial placement at registration
    Initial,
    /// ATR trailing recalculation
    Trailing,
    /// Floor installed by a take-profit rung
    TakeProfit,
    /// Decision process outside this core
    External,
    /// Operator
    Manual,
}

impl fmt::Display for StopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopSource::Initial => "initial",
            StopSource::Trailing => "trailing",
            StopSource::TakeProfit => "take_profit",
            StopSource::External => "external",
            StopSource::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// One entry of the stop history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossEvent {
    /// Stop before the change
    pub old_stop: Price,
    /// Requested stop
    pub new_stop: Price,
    /// Free-form cause, logged verbatim
    pub reason: String,
    /// Origin of the request
    pub source: StopSource,
    /// Set once the replacement order rests at the venue
    pub applied: bool,
    /// When the change was requested
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Position
// =============================================================================

/// An open position under stop-loss protection.
///
/// `entry_price` and `side` never change after construction. The
/// committed `current_stop_loss` only ever moves in the favorable
/// direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique position ID (UUID v7)
    pub id: PositionId,
    /// Trading pair
    pub symbol: Symbol,
    /// Position direction
    pub side: Side,
    /// Stop lifecycle state
    pub state: StopState,

    /// Fill price at entry
    pub entry_price: Price,
    /// Remaining size, reduced by partial exits
    pub quantity: Quantity,
    /// Size at registration, basis for rung sizes
    pub original_quantity: Quantity,

    /// Stop placed at registration
    pub initial_stop_loss: Price,
    /// Last committed stop
    pub current_stop_loss: Price,
    /// Last favorable candidate that did not clear the update threshold
    pub computed_stop_loss: Option<Price>,

    /// Highest price since entry (long) or lowest (short)
    pub extreme_price: Price,
    /// Last observed market price
    pub current_price: Price,

    /// Venue id of the resting stop, `None` when unprotected
    pub stop_order_id: Option<String>,
    /// Every stop change, applied or not
    pub stop_loss_history: Vec<StopLossEvent>,
    /// Staged exits, `None` when disabled
    pub take_profit_ladder: Option<TakeProfitLadder>,

    /// When the position was registered
    pub opened_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a registered position with no resting order.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if the initial stop sits on the
    /// profitable side of entry.
    pub fn new(
        symbol: Symbol,
        side: Side,
        entry_price: Price,
        quantity: Quantity,
        initial_stop_loss: Price,
    ) -> Result<Self, DomainError> {
        if side.is_better(initial_stop_loss.as_decimal(), entry_price.as_decimal()) {
            return Err(DomainError::InvalidPrice(format!(
                "{side} stop {initial_stop_loss} is on the profit side of entry {entry_price}"
            )));
        }

        if quantity.is_zero() {
            return Err(DomainError::InvalidQuantity("Open position needs a quantity".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            symbol,
            side,
            state: StopState::Registered,
            entry_price,
            quantity,
            original_quantity: quantity,
            initial_stop_loss,
            current_stop_loss: initial_stop_loss,
            computed_stop_loss: None,
            extreme_price: entry_price,
            current_price: entry_price,
            stop_order_id: None,
            stop_loss_history: Vec::new(),
            take_profit_ladder: None,
            opened_at: now,
            updated_at: now,
        })
    }

    /// Reset price tracking to the entry price.
    pub fn seed_from_entry(&mut self) {
        self.extreme_price = self.entry_price;
        self.current_price = self.entry_price;
        self.updated_at = Utc::now();
    }

    /// Record a new market price.
    ///
    /// Returns `true` if the favorable extreme moved. Ties do not move it.
    pub fn update_price(&mut self, price: Price) -> bool {
        self.current_price = price;
        self.updated_at = Utc::now();

        if self.side.is_better(price.as_decimal(), self.extreme_price.as_decimal()) {
            self.extreme_price = price;
            return true;
        }
        false
    }

    /// Whether `price` breaches the committed stop (inclusive).
    pub fn is_stop_hit(&self, price: Price) -> bool {
        match self.side {
            Side::Long => price <= self.current_stop_loss,
            Side::Short => price >= self.current_stop_loss,
        }
    }

    /// Best price seen since entry.
    pub fn favorable_extreme(&self) -> Price {
        self.extreme_price
    }

    /// Unrealized P&L of the remaining quantity at the last price.
    pub fn unrealized_pnl(&self) -> Decimal {
        let per_unit = (self.current_price.as_decimal() - self.entry_price.as_decimal())
            * self.side.sign();
        per_unit * self.quantity.as_decimal()
    }

    /// Unrealized move from entry in percent, positive when in profit.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        let entry = self.entry_price.as_decimal();
        (self.current_price.as_decimal() - entry) / entry * Decimal::ONE_HUNDRED * self.side.sign()
    }

    /// P&L realized by closing `quantity` at `fill_price`.
    pub fn realized_pnl(&self, fill_price: Price, quantity: Quantity) -> Decimal {
        (fill_price.as_decimal() - self.entry_price.as_decimal())
            * self.side.sign()
            * quantity.as_decimal()
    }

    /// Floor installed by the highest executed take-profit rung.
    pub fn take_profit_floor(&self) -> Option<Price> {
        self.take_profit_ladder.as_ref().and_then(TakeProfitLadder::floor)
    }

    /// Whether the position is still tracked as open.
    pub fn is_open(&self) -> bool {
        self.state != StopState::Closed
    }

    /// Move the stop state machine.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStateTransition` when leaving `Closed`,
    /// or leaving `Triggered` for anything but `Closed`.
    pub fn transition(&mut self, next: StopState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} -> {} for {}",
                self.state, next, self.symbol
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a history entry, not yet applied. Returns its index.
    pub fn record_stop_change(
        &mut self,
        new_stop: Price,
        reason: impl Into<String>,
        source: StopSource,
    ) -> usize {
        self.stop_loss_history.push(StopLossEvent {
            old_stop: self.current_stop_loss,
            new_stop,
            reason: reason.into(),
            source,
            applied: false,
            timestamp: Utc::now(),
        });
        self.stop_loss_history.len() - 1
    }

    /// Commit an applied stop change.
    pub fn commit_stop(&mut self, history_idx: usize, new_stop: Price, order_id: String) {
        if let Some(event) = self.stop_loss_history.get_mut(history_idx) {
            event.applied = true;
        }
        self.current_stop_loss = new_stop;
        self.computed_stop_loss = None;
        self.stop_order_id = Some(order_id);
        self.updated_at = Utc::now();
    }

    /// Reduce the remaining quantity after a partial exit.
    pub fn reduce_quantity(&mut self, closed: Quantity) {
        self.quantity = self.quantity.saturating_sub(closed);
        self.updated_at = Utc::now();
    }

    /// Mark fully closed.
    pub fn close(&mut self) {
        self.quantity = Quantity::zero();
        self.stop_order_id = None;
        self.state = StopState::Closed;
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Tests
// =============================================================================
