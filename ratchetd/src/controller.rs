//! Stop-Loss Controller: lifecycle of the protective stop.
//!
//! Every stop change, whatever its source, passes the same gates:
//!
//! ```text
//! proposal → floor clamp → strictly favorable? → threshold (if protected)
//!          → record history → cancel old order → place new order → commit
//! ```
//!
//! A cancel failure is logged and the replacement is placed anyway. A
//! failed placement leaves the position with no resting order, which is
//! reported as `ProtectionLost` and repaired by `ensure_protected` on the
//! next scan.
//!
//! Mutating operations hold the position's own lock for their whole
//! duration, gateway calls included, so two replacement sequences for the
//! same symbol never interleave.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use ratchet_domain::{Position, Price, Quantity, StopSource, StopState, Symbol};
use ratchet_engine::stops::{
    change_pct, clamp_to_floor, exceeds_update_threshold, is_favorable_move,
};
use ratchet_engine::{decide_trailing, RiskParameterStore, TrailingDecision, TrailingInput};
use ratchet_exec::{ExchangeGateway, ExecError};

use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, RiskEvent};
use crate::gateway::Gateway;
use crate::registry::{PositionHandle, PositionRegistry};

// =============================================================================
// Floor Provider
// =============================================================================

/// Source of the take-profit floor for a position.
pub trait FloorProvider: Send + Sync {
    /// Floor the stop may not cross, if any.
    fn floor(&self, position: &Position) -> Option<Price>;
}

/// Reads the floor from the position's own ladder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LadderFloor;

impl FloorProvider for LadderFloor {
    fn floor(&self, position: &Position) -> Option<Price> {
        position.take_profit_floor()
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a stop update request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum StopUpdateOutcome {
    /// Replacement order rests at the venue
    Applied {
        /// Stop before
        old_stop: Price,
        /// Stop after
        new_stop: Price,
        /// Venue order id
        order_id: String,
    },
    /// Favorable but below the update threshold, recorded as computed
    Deferred {
        /// Committed stop
        current_stop: Price,
        /// Recorded candidate
        computed_stop: Price,
    },
    /// Trailing candidate does not tighten the stop
    Held {
        /// Raw candidate
        candidate: Decimal,
    },
    /// Trailing candidate is closer to the market than allowed
    TooTight {
        /// Candidate after the floor clamp
        candidate: Price,
        /// Distance from the current price, percent
        distance_pct: Decimal,
    },
    /// Position is triggered or closed
    Inactive {
        /// Current state
        state: StopState,
    },
    /// No position registered for the symbol
    NotFound,
}

/// Result of a price tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Still open
    Holding {
        /// The favorable extreme moved
        extreme_updated: bool,
    },
    /// Stop hit and position closed at market
    Closed {
        /// Market fill
        fill_price: Price,
        /// Quantity closed
        quantity: Quantity,
    },
    /// No position registered for the symbol
    NotFound,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns stop placement, replacement and triggered exits.
pub struct StopLossController<E: ExchangeGateway + 'static> {
    gateway: Arc<Gateway<E>>,
    registry: Arc<PositionRegistry>,
    params: Arc<RiskParameterStore>,
    event_bus: Arc<EventBus>,
    floors: Arc<dyn FloorProvider>,
}

impl<E: ExchangeGateway + 'static> StopLossController<E> {
    /// Create a controller that reads floors from position ladders.
    pub fn new(
        gateway: Arc<Gateway<E>>,
        registry: Arc<PositionRegistry>,
        params: Arc<RiskParameterStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self::with_floor_provider(gateway, registry, params, event_bus, Arc::new(LadderFloor))
    }

    /// Create a controller with an explicit floor source.
    pub fn with_floor_provider(
        gateway: Arc<Gateway<E>>,
        registry: Arc<PositionRegistry>,
        params: Arc<RiskParameterStore>,
        event_bus: Arc<EventBus>,
        floors: Arc<dyn FloorProvider>,
    ) -> Self {
        Self {
            gateway,
            registry,
            params,
            event_bus,
            floors,
        }
    }

    /// Parameter store shared with the rest of the daemon.
    pub fn params(&self) -> &Arc<RiskParameterStore> {
        &self.params
    }

    /// Floor currently in force for `position`.
    pub fn floor_for(&self, position: &Position) -> Option<Price> {
        self.floors.floor(position)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Place the initial stop for a registered position.
    ///
    /// Idempotent: a position that already has a resting order returns its
    /// id. `Ok(None)` when the symbol is not registered.
    ///
    /// # Errors
    /// `ProtectionLost` if placement fails; the position stays `Registered`.
    pub async fn place_initial_stop(&self, symbol: &Symbol) -> DaemonResult<Option<String>> {
        self.ensure_protected(symbol).await
    }

    /// Place a stop at the committed level if none rests at the venue.
    pub async fn ensure_protected(&self, symbol: &Symbol) -> DaemonResult<Option<String>> {
        let Some(handle) = self.registry.handle(symbol).await else {
            return Ok(None);
        };
        let mut position = handle.lock().await;

        if position.state != StopState::Registered {
            return Ok(position.stop_order_id.clone());
        }

        self.place_stop_locked(&mut position).await.map(Some)
    }

    pub(crate) async fn place_stop_locked(&self, position: &mut Position) -> DaemonResult<String> {
        if let Some(order_id) = &position.stop_order_id {
            return Ok(order_id.clone());
        }

        let stop = position.current_stop_loss;
        let result = self
            .gateway
            .place_stop(&position.symbol, position.side.exit_action(), stop, position.quantity)
            .await;

        let order_id = match result {
            Ok(order_id) => order_id,
            Err(e) => return Err(self.protection_lost(position, e)),
        };

        if position.stop_loss_history.is_empty() {
            let idx = position.record_stop_change(stop, "initial stop", StopSource::Initial);
            position.commit_stop(idx, stop, order_id.clone());
        } else {
            position.stop_order_id = Some(order_id.clone());
        }
        position.transition(StopState::Active)?;

        info!(
            symbol = %position.symbol,
            side = %position.side,
            stop = %stop,
            quantity = %position.quantity,
            %order_id,
            outcome = "success",
            "Stop order placed"
        );
        self.event_bus.send(RiskEvent::StopPlaced {
            symbol: position.symbol.clone(),
            stop,
            order_id: order_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(order_id)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Request a new stop for `symbol`.
    ///
    /// Enforces the floor clamp, strict favorability and the update
    /// threshold regardless of caller.
    ///
    /// # Errors
    /// - `InvalidDirection` if the proposal does not tighten the stop
    /// - `BelowFloor` if the proposal lies beyond a floor that is already in force
    /// - `ProtectionLost` if the replacement order could not be placed
    pub async fn request_update(
        &self,
        symbol: &Symbol,
        proposed: Price,
        reason: &str,
        source: StopSource,
    ) -> DaemonResult<StopUpdateOutcome> {
        let Some(handle) = self.registry.handle(symbol).await else {
            debug!(%symbol, "Stop update for unregistered symbol ignored");
            return Ok(StopUpdateOutcome::NotFound);
        };
        let mut position = handle.lock().await;

        self.apply_update_locked(&mut position, proposed, reason, source).await
    }

    pub(crate) async fn apply_update_locked(
        &self,
        position: &mut Position,
        proposed: Price,
        reason: &str,
        source: StopSource,
    ) -> DaemonResult<StopUpdateOutcome> {
        match position.state {
            StopState::Closed => return Ok(StopUpdateOutcome::NotFound),
            StopState::Triggered => {
                return Ok(StopUpdateOutcome::Inactive {
                    state: position.state,
                })
            },
            StopState::Registered | StopState::Active => {},
        }

        let symbol = position.symbol.clone();
        let side = position.side;
        let current = position.current_stop_loss;
        let floor = self.floors.floor(position);
        let candidate = clamp_to_floor(side, proposed, floor);

        if !is_favorable_move(side, current, candidate) {
            warn!(
                %symbol,
                %side,
                old_stop = %current,
                new_stop = %proposed,
                %reason,
                %source,
                "Rejected stop update: not a favorable move"
            );
            return Err(match floor {
                Some(floor) if candidate != proposed => DaemonError::BelowFloor {
                    symbol,
                    proposed,
                    floor,
                },
                _ => DaemonError::InvalidDirection {
                    symbol,
                    side,
                    current,
                    proposed,
                },
            });
        }

        if candidate != proposed {
            info!(%symbol, proposed = %proposed, floor = %candidate, %source, "Stop clamped to take-profit floor");
        }

        let params = self.params.lookup(&symbol);
        let protected = position.stop_order_id.is_some();
        if protected && !exceeds_update_threshold(current, candidate, &params) {
            let change = change_pct(current, candidate);
            position.computed_stop_loss = Some(candidate);
            debug!(
                %symbol,
                current_stop = %current,
                computed_stop = %candidate,
                change_pct = %change,
                threshold_pct = %params.update_threshold_pct,
                "Stop change below update threshold, not replacing order"
            );
            self.event_bus.send(RiskEvent::StopUpdateDeferred {
                symbol,
                current_stop: current,
                computed_stop: candidate,
                change_pct: change,
                timestamp: Utc::now(),
            });
            return Ok(StopUpdateOutcome::Deferred {
                current_stop: current,
                computed_stop: candidate,
            });
        }

        let idx = position.record_stop_change(candidate, reason, source);
        let order_id = self.replace_order_locked(position, candidate).await?;
        position.commit_stop(idx, candidate, order_id.clone());
        position.transition(StopState::Active)?;

        info!(
            %symbol,
            %side,
            old_stop = %current,
            new_stop = %candidate,
            %reason,
            %source,
            %order_id,
            outcome = "success",
            "Stop loss updated"
        );
        self.event_bus.send(RiskEvent::StopUpdated {
            symbol,
            old_stop: current,
            new_stop: candidate,
            reason: reason.to_string(),
            source,
            timestamp: Utc::now(),
        });

        Ok(StopUpdateOutcome::Applied {
            old_stop: current,
            new_stop: candidate,
            order_id,
        })
    }

    /// Replace the resting order at the committed stop, e.g. after a
    /// partial exit changed the quantity.
    pub(crate) async fn resize_locked(&self, position: &mut Position, reason: &str) -> DaemonResult<String> {
        let stop = position.current_stop_loss;
        let order_id = self.replace_order_locked(position, stop).await?;
        position.stop_order_id = Some(order_id.clone());
        position.transition(StopState::Active)?;

        info!(
            symbol = %position.symbol,
            stop = %stop,
            quantity = %position.quantity,
            %reason,
            %order_id,
            outcome = "success",
            "Stop order resized"
        );
        Ok(order_id)
    }

    /// Cancel the resting order (best effort) and place a new one.
    ///
    /// Both calls ignore shutdown so the old order is gone before the new
    /// one rests. On placement failure the position is left `Registered`
    /// with no order.
    async fn replace_order_locked(&self, position: &mut Position, stop: Price) -> DaemonResult<String> {
        if let Some(old_order) = position.stop_order_id.take() {
            match self.gateway.cancel_detached(&position.symbol, &old_order).await {
                Ok(()) => debug!(symbol = %position.symbol, %old_order, "Old stop order cancelled"),
                Err(e) => warn!(
                    symbol = %position.symbol,
                    %old_order,
                    error = %e,
                    "Failed to cancel old stop order, placing replacement anyway"
                ),
            }
        }

        let result = self
            .gateway
            .place_stop_detached(&position.symbol, position.side.exit_action(), stop, position.quantity)
            .await;

        match result {
            Ok(order_id) => Ok(order_id),
            Err(e) => Err(self.protection_lost(position, e)),
        }
    }

    fn protection_lost(&self, position: &mut Position, source: ExecError) -> DaemonError {
        position.stop_order_id = None;
        if position.state == StopState::Active {
            position.state = StopState::Registered;
        }

        if matches!(source, ExecError::Cancelled(_)) {
            warn!(symbol = %position.symbol, "Stop placement abandoned on shutdown");
            return DaemonError::Shutdown;
        }

        error!(
            symbol = %position.symbol,
            side = %position.side,
            stop = %position.current_stop_loss,
            quantity = %position.quantity,
            error = %source,
            "PROTECTION LOST: position has no resting stop order"
        );
        self.event_bus.send(RiskEvent::ProtectionLost {
            symbol: position.symbol.clone(),
            error: source.to_string(),
            timestamp: Utc::now(),
        });

        DaemonError::ProtectionLost {
            symbol: position.symbol.clone(),
            source,
        }
    }

    // =========================================================================
    // Trailing
    // =========================================================================

    /// Recompute the trailing stop from the favorable extreme and `atr`.
    ///
    /// # Errors
    /// As [`StopLossController::request_update`].
    pub async fn recalculate_trailing(
        &self,
        symbol: &Symbol,
        atr: Decimal,
    ) -> DaemonResult<StopUpdateOutcome> {
        let Some(handle) = self.registry.handle(symbol).await else {
            return Ok(StopUpdateOutcome::NotFound);
        };
        let mut position = handle.lock().await;

        if position.state == StopState::Closed {
            return Ok(StopUpdateOutcome::NotFound);
        }

        let params = self.params.lookup(symbol);
        let input = TrailingInput {
            side: position.side,
            favorable_extreme: position.favorable_extreme(),
            current_price: position.current_price,
            current_stop: position.current_stop_loss,
            floor: self.floors.floor(&position),
        };

        match decide_trailing(&input, atr, &params) {
            TrailingDecision::Hold { candidate } => {
                debug!(%symbol, %candidate, current_stop = %input.current_stop, "Trailing stop holds");
                Ok(StopUpdateOutcome::Held { candidate })
            },
            TrailingDecision::TooTight {
                candidate,
                distance_pct,
            } => {
                info!(
                    %symbol,
                    %candidate,
                    %distance_pct,
                    min_pct = %params.min_stop_distance_pct,
                    price = %input.current_price,
                    "Trailing stop too close to market, not applied"
                );
                Ok(StopUpdateOutcome::TooTight {
                    candidate,
                    distance_pct,
                })
            },
            TrailingDecision::Propose {
                stop,
                distance_pct,
                clamped,
                wide,
            } => {
                if wide {
                    warn!(
                        %symbol,
                        new_stop = %stop,
                        %distance_pct,
                        max_pct = %params.max_stop_distance_pct,
                        "Trailing stop wider than configured maximum"
                    );
                }
                let reason = format!(
                    "trailing: extreme {} - {} x ATR {}{}",
                    input.favorable_extreme,
                    params.trailing_atr_multiplier,
                    atr,
                    if clamped { " (floor)" } else { "" }
                );
                self.apply_update_locked(&mut position, stop, &reason, StopSource::Trailing)
                    .await
            },
        }
    }

    // =========================================================================
    // Price Ticks
    // =========================================================================

    /// Record a price and close the position if the stop is breached.
    ///
    /// A position whose close fails stays `Triggered`; the next tick retries
    /// the close whatever the price.
    ///
    /// # Errors
    /// `Gateway` if the market close fails.
    pub async fn on_price_tick(&self, symbol: &Symbol, price: Price) -> DaemonResult<TickOutcome> {
        let Some(handle) = self.registry.handle(symbol).await else {
            return Ok(TickOutcome::NotFound);
        };
        let mut position = handle.lock().await;

        if !position.is_open() {
            return Ok(TickOutcome::NotFound);
        }

        let extreme_updated = position.update_price(price);
        if extreme_updated {
            debug!(%symbol, extreme = %price, "New favorable extreme");
        }

        if position.state != StopState::Triggered && !position.is_stop_hit(price) {
            return Ok(TickOutcome::Holding { extreme_updated });
        }

        if position.state != StopState::Triggered {
            position.transition(StopState::Triggered)?;
            warn!(
                %symbol,
                side = %position.side,
                stop = %position.current_stop_loss,
                %price,
                "Stop loss triggered"
            );
            self.event_bus.send(RiskEvent::StopTriggered {
                symbol: symbol.clone(),
                stop: position.current_stop_loss,
                price,
                timestamp: Utc::now(),
            });
        }

        self.close_locked(&handle, &mut position, "stop triggered").await
    }

    /// Cancel the resting stop ahead of a market close.
    ///
    /// The order id is kept until the venue confirms the cancel, so a
    /// failed close retries the cancel too.
    pub(crate) async fn cancel_before_close(&self, position: &mut Position) {
        let Some(order_id) = position.stop_order_id.clone() else {
            return;
        };
        match self.gateway.cancel(&position.symbol, &order_id).await {
            Ok(()) => position.stop_order_id = None,
            Err(e) => warn!(
                symbol = %position.symbol,
                %order_id,
                error = %e,
                "Failed to cancel stop order before close"
            ),
        }
    }

    /// Close whatever remains at market and remove the position.
    pub(crate) async fn close_locked(
        &self,
        handle: &PositionHandle,
        position: &mut Position,
        reason: &str,
    ) -> DaemonResult<TickOutcome> {
        let symbol = position.symbol.clone();

        self.cancel_before_close(position).await;

        let quantity = position.quantity;
        let fill_price = match self
            .gateway
            .market_close(&symbol, position.side.exit_action(), quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(
                    %symbol,
                    %quantity,
                    %reason,
                    error = %e,
                    "Market close failed, position stays open for retry"
                );
                return Err(match e {
                    ExecError::Cancelled(_) => DaemonError::Shutdown,
                    source => DaemonError::Gateway {
                        operation: "place_market_close",
                        symbol,
                        source,
                    },
                });
            },
        };

        let realized_pnl = position.realized_pnl(fill_price, quantity);
        if let Some(order_id) = &position.stop_order_id {
            error!(%symbol, %order_id, "Position closed but its stop order may still rest at the venue");
        }
        position.close();
        self.registry.remove_if_same(&symbol, handle).await;

        info!(
            %symbol,
            side = %position.side,
            entry = %position.entry_price,
            stop = %position.current_stop_loss,
            %fill_price,
            %quantity,
            %realized_pnl,
            %reason,
            outcome = "success",
            "Position closed"
        );
        self.event_bus.send(RiskEvent::PositionClosed {
            symbol,
            fill_price,
            realized_pnl,
            timestamp: Utc::now(),
        });

        Ok(TickOutcome::Closed {
            fill_price,
            quantity,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
