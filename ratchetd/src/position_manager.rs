//! Position Manager: the API the decision process talks to.
//!
//! Wires the registry, stop-loss controller and take-profit manager
//! together and exposes them as one surface. Opening decisions and sizing
//! happen elsewhere; this only protects what it is handed.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ratchet_domain::{Position, Price, Quantity, Side, StopSource, Symbol};
use ratchet_engine::stops::{initial_stop, is_distance_within_range, stop_distance_pct};
use ratchet_engine::RiskParameterStore;
use ratchet_exec::ExchangeGateway;

use crate::config::Config;
use crate::controller::{StopLossController, StopUpdateOutcome, TickOutcome};
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, RiskEvent};
use crate::gateway::Gateway;
use crate::registry::{PositionHandle, PositionRegistry};
use crate::take_profit::TakeProfitManager;

// =============================================================================
// Position Manager
// =============================================================================

/// Facade over registration, stop management and the take-profit ladder.
pub struct PositionManager<E: ExchangeGateway + 'static> {
    gateway: Arc<Gateway<E>>,
    registry: Arc<PositionRegistry>,
    controller: Arc<StopLossController<E>>,
    take_profit: Arc<TakeProfitManager<E>>,
    params: Arc<RiskParameterStore>,
    event_bus: Arc<EventBus>,
    take_profit_enabled: bool,
}

impl<E: ExchangeGateway + 'static> PositionManager<E> {
    /// Build every component around `exchange`.
    pub fn new(
        exchange: Arc<E>,
        params: Arc<RiskParameterStore>,
        event_bus: Arc<EventBus>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        let gateway = Arc::new(Gateway::new(exchange, config.monitor.call_timeout, shutdown));
        let registry = Arc::new(PositionRegistry::new());
        let controller = Arc::new(StopLossController::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::clone(&params),
            Arc::clone(&event_bus),
        ));
        let take_profit = Arc::new(TakeProfitManager::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::clone(&controller),
            Arc::clone(&event_bus),
            config.risk.ladder.clone(),
        ));

        Self {
            gateway,
            registry,
            controller,
            take_profit,
            params,
            event_bus,
            take_profit_enabled: config.risk.take_profit_enabled,
        }
    }

    /// The stop-loss controller.
    pub fn controller(&self) -> &Arc<StopLossController<E>> {
        &self.controller
    }

    /// The take-profit manager.
    pub fn take_profit(&self) -> &Arc<TakeProfitManager<E>> {
        &self.take_profit
    }

    /// Parameter store.
    pub fn params(&self) -> &Arc<RiskParameterStore> {
        &self.params
    }

    /// Event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Exchange gateway with deadlines.
    pub fn gateway(&self) -> &Arc<Gateway<E>> {
        &self.gateway
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Track a position.
    ///
    /// Attaches a take-profit ladder when enabled and the position has
    /// none. A position whose risk distance is zero is tracked without one.
    pub async fn register_position(&self, mut position: Position) -> PositionHandle {
        if self.take_profit_enabled && position.take_profit_ladder.is_none() {
            if let Err(e) = self.take_profit.initialize(&mut position) {
                warn!(
                    symbol = %position.symbol,
                    error = %e,
                    "Take-profit ladder not attached"
                );
            }
        }

        let event = RiskEvent::PositionRegistered {
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            initial_stop: position.initial_stop_loss,
            timestamp: Utc::now(),
        };

        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            stop = %position.initial_stop_loss,
            quantity = %position.quantity,
            "Position registered"
        );

        let handle = self.registry.register(position).await;
        self.event_bus.send(event);
        handle
    }

    /// Stop tracking `symbol`. Resting orders are left as they are.
    pub async fn remove_position(&self, symbol: &Symbol) -> bool {
        let removed = self.registry.remove(symbol).await;
        if let Some(handle) = &removed {
            let mut position = handle.lock().await;
            info!(%symbol, order_id = ?position.stop_order_id, "Position removed from registry");
            position.close();
        }
        removed.is_some()
    }

    /// Snapshot of one position.
    pub async fn get_position(&self, symbol: &Symbol) -> Option<Position> {
        self.registry.get(symbol).await
    }

    /// Snapshot of every open position, sorted by symbol.
    pub async fn get_all_positions(&self) -> Vec<Position> {
        self.registry.get_all().await
    }

    /// Registered symbols, sorted.
    pub async fn symbols(&self) -> Vec<Symbol> {
        self.registry.symbols().await
    }

    // =========================================================================
    // Stops
    // =========================================================================

    /// Place the initial stop order for a registered position.
    pub async fn place_initial_stop_loss(&self, symbol: &Symbol) -> DaemonResult<Option<String>> {
        self.controller.place_initial_stop(symbol).await
    }

    /// Entry point for externally proposed stops.
    pub async fn request_stop_update(
        &self,
        symbol: &Symbol,
        new_stop: Price,
        reason: &str,
    ) -> DaemonResult<StopUpdateOutcome> {
        self.controller.request_update(symbol, new_stop, reason, StopSource::External).await
    }

    /// Stop change requested by an operator.
    pub async fn request_manual_stop_update(
        &self,
        symbol: &Symbol,
        new_stop: Price,
        reason: &str,
    ) -> DaemonResult<StopUpdateOutcome> {
        self.controller.request_update(symbol, new_stop, reason, StopSource::Manual).await
    }

    /// Feed a market price.
    pub async fn on_price_tick(&self, symbol: &Symbol, price: Price) -> DaemonResult<TickOutcome> {
        self.controller.on_price_tick(symbol, price).await
    }

    /// Recompute the trailing stop for `symbol` with `atr`.
    pub async fn recalculate_trailing(
        &self,
        symbol: &Symbol,
        atr: Decimal,
    ) -> DaemonResult<StopUpdateOutcome> {
        self.controller.recalculate_trailing(symbol, atr).await
    }

    /// Place a stop for any position left without one.
    pub async fn ensure_protected(&self, symbol: &Symbol) -> DaemonResult<Option<String>> {
        self.controller.ensure_protected(symbol).await
    }

    // =========================================================================
    // Take Profit
    // =========================================================================

    /// Execute the next due rung, returns the number executed (0 or 1).
    pub async fn evaluate_take_profit(&self, symbol: &Symbol, price: Price) -> DaemonResult<usize> {
        self.take_profit.evaluate(symbol, price).await
    }

    /// Floor installed by the highest executed rung.
    pub async fn get_take_profit_floor(&self, symbol: &Symbol) -> Option<Price> {
        self.take_profit.floor(symbol).await
    }

    /// Human-readable rung summary.
    pub async fn get_take_profit_status(&self, symbol: &Symbol) -> Option<String> {
        self.take_profit.status(symbol).await
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Protect a freshly filled position: compute its ATR stop, register it
    /// and place the stop order.
    ///
    /// # Errors
    /// - `Domain` if the computed stop is not a positive price
    /// - `ProtectionLost` if the stop order could not be placed; the
    ///   position stays registered and is retried by the monitor
    pub async fn open_position(
        &self,
        symbol: Symbol,
        side: Side,
        entry_price: Price,
        quantity: Quantity,
        atr: Decimal,
    ) -> DaemonResult<Position> {
        let params = self.params.lookup(&symbol);
        let stop = Price::new(initial_stop(entry_price, atr, side, &params))?;

        if !is_distance_within_range(entry_price, stop, side, &params) {
            warn!(
                %symbol,
                %side,
                entry = %entry_price,
                %stop,
                distance_pct = %stop_distance_pct(entry_price, stop, side),
                min_pct = %params.min_stop_distance_pct,
                max_pct = %params.max_stop_distance_pct,
                "Initial stop distance outside configured range"
            );
        }

        let position = Position::new(symbol.clone(), side, entry_price, quantity, stop)?;
        self.register_position(position).await;
        self.place_initial_stop_loss(&symbol).await?;

        self.get_position(&symbol).await.ok_or_else(|| {
            DaemonError::Config(format!("{symbol} was removed while it was being opened"))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
