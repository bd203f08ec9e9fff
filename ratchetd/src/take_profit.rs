//! Take-Profit Manager: executes ladder rungs as price reaches them.
//!
//! At most one rung fires per evaluation. After a rung fills, its floor
//! is submitted to the controller as a `TakeProfit` update and the resting
//! stop is resized to the remaining quantity. The final rung closes
//! whatever is left and removes the position.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use ratchet_domain::{LadderConfig, Position, Price, StopSource, StopState, Symbol, TakeProfitLadder};
use ratchet_exec::{ExchangeGateway, ExecError};

use crate::controller::{StopLossController, StopUpdateOutcome};
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, RiskEvent};
use crate::gateway::Gateway;
use crate::registry::{PositionHandle, PositionRegistry};

/// Staged partial exits for registered positions.
pub struct TakeProfitManager<E: ExchangeGateway + 'static> {
    gateway: Arc<Gateway<E>>,
    registry: Arc<PositionRegistry>,
    controller: Arc<StopLossController<E>>,
    event_bus: Arc<EventBus>,
    config: LadderConfig,
}

impl<E: ExchangeGateway + 'static> TakeProfitManager<E> {
    /// Create a manager building ladders with `config`.
    pub fn new(
        gateway: Arc<Gateway<E>>,
        registry: Arc<PositionRegistry>,
        controller: Arc<StopLossController<E>>,
        event_bus: Arc<EventBus>,
        config: LadderConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            controller,
            event_bus,
            config,
        }
    }

    /// Build the ladder for a position from its entry and initial stop.
    ///
    /// # Errors
    /// `Domain` if the config is invalid or the risk distance is zero.
    pub fn initialize(&self, position: &mut Position) -> DaemonResult<()> {
        let ladder = TakeProfitLadder::build(
            position.side,
            position.entry_price,
            position.initial_stop_loss,
            &self.config,
        )?;

        info!(
            symbol = %position.symbol,
            side = %position.side,
            risk = %ladder.risk_distance,
            targets = ?ladder.levels.iter().map(|l| l.target_price.to_string()).collect::<Vec<_>>(),
            "Take-profit ladder initialized"
        );

        position.take_profit_ladder = Some(ladder);
        Ok(())
    }

    /// Build a ladder for an already registered position.
    pub async fn initialize_for(&self, symbol: &Symbol) -> DaemonResult<bool> {
        let Some(handle) = self.registry.handle(symbol).await else {
            return Ok(false);
        };
        let mut position = handle.lock().await;
        if !position.is_open() {
            return Ok(false);
        }

        self.initialize(&mut position)?;
        Ok(true)
    }

    /// Execute the next rung if `price` has reached it.
    ///
    /// Returns the number of rungs executed by this call (0 or 1).
    ///
    /// # Errors
    /// `Gateway` if the partial close fails; the rung stays pending and is
    /// retried on the next evaluation.
    pub async fn evaluate(&self, symbol: &Symbol, price: Price) -> DaemonResult<usize> {
        let Some(handle) = self.registry.handle(symbol).await else {
            return Ok(0);
        };
        let mut position = handle.lock().await;

        if !position.is_open() || position.state == StopState::Triggered {
            return Ok(0);
        }

        let side = position.side;
        let Some(ladder) = position.take_profit_ladder.as_ref() else {
            return Ok(0);
        };
        let Some(idx) = ladder.due_level(side, price) else {
            return Ok(0);
        };

        let level = ladder.levels[idx].clone();
        let is_final = ladder.is_final_pending(idx);
        let quantity = ladder.close_quantity(idx, position.original_quantity, position.quantity);

        debug!(
            %symbol,
            level = level.level,
            target = %level.target_price,
            %price,
            %quantity,
            "Take-profit level reached"
        );

        let fill_price = match self.gateway.market_close(symbol, side.exit_action(), quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(
                    %symbol,
                    level = level.level,
                    %quantity,
                    error = %e,
                    "Take-profit partial close failed, level stays pending"
                );
                return Err(match e {
                    ExecError::Cancelled(_) => DaemonError::Shutdown,
                    source => DaemonError::Gateway {
                        operation: "place_market_close",
                        symbol: symbol.clone(),
                        source,
                    },
                });
            },
        };

        if let Some(ladder) = position.take_profit_ladder.as_mut() {
            ladder.mark_executed(idx, fill_price, Utc::now())?;
        }
        let realized_pnl = position.realized_pnl(fill_price, quantity);
        position.reduce_quantity(quantity);

        info!(
            %symbol,
            level = level.level,
            ratio = %level.risk_reward_ratio,
            target = %level.target_price,
            %fill_price,
            %quantity,
            %realized_pnl,
            remaining = %position.quantity,
            outcome = "success",
            "Take-profit level executed"
        );
        self.event_bus.send(RiskEvent::TakeProfitExecuted {
            symbol: symbol.clone(),
            level: level.level,
            fill_price,
            quantity,
            realized_pnl,
            remaining: position.quantity,
            timestamp: Utc::now(),
        });

        if is_final || position.quantity.is_zero() {
            self.finish(&handle, &mut position, fill_price, realized_pnl).await;
            return Ok(1);
        }

        self.install_floor(&mut position, level.level, level.new_stop_loss).await;
        Ok(1)
    }

    /// Submit the rung's floor and make the resting stop match the new size.
    async fn install_floor(&self, position: &mut Position, level: u32, floor: Price) {
        let reason = format!("take-profit L{level} floor");
        let outcome = self
            .controller
            .apply_update_locked(position, floor, &reason, StopSource::TakeProfit)
            .await;

        let needs_resize = match outcome {
            Ok(StopUpdateOutcome::Applied { .. }) => false,
            Ok(StopUpdateOutcome::Deferred { current_stop, computed_stop }) => {
                debug!(
                    symbol = %position.symbol,
                    level,
                    %floor,
                    resting_stop = %current_stop,
                    %computed_stop,
                    "Take-profit floor below update threshold, computed but not yet resting"
                );
                true
            },
            Ok(_) => true,
            Err(DaemonError::InvalidDirection { .. }) | Err(DaemonError::BelowFloor { .. }) => {
                debug!(symbol = %position.symbol, %floor, "Stop already beyond take-profit floor");
                true
            },
            // Already logged and published by the controller
            Err(_) => false,
        };

        if needs_resize {
            let reason = format!("resize after take-profit L{level}");
            if let Err(e) = self.controller.resize_locked(position, &reason).await {
                error!(symbol = %position.symbol, error = %e, "Failed to resize stop after take-profit");
            }
        }
    }

    /// Every rung has fired: drop the stop order and the registry entry.
    async fn finish(
        &self,
        handle: &PositionHandle,
        position: &mut Position,
        fill_price: Price,
        realized_pnl: Decimal,
    ) {
        let symbol = position.symbol.clone();

        self.controller.cancel_before_close(position).await;
        if let Some(order_id) = &position.stop_order_id {
            error!(%symbol, %order_id, "Ladder complete but its stop order may still rest at the venue");
        }

        position.close();
        self.registry.remove_if_same(&symbol, handle).await;

        info!(%symbol, outcome = "success", "Take-profit ladder complete, position closed");
        self.event_bus.send(RiskEvent::PositionClosed {
            symbol,
            fill_price,
            realized_pnl,
            timestamp: Utc::now(),
        });
    }

    /// Floor from the highest executed rung.
    pub async fn floor(&self, symbol: &Symbol) -> Option<Price> {
        let position = self.registry.get(symbol).await?;
        self.controller.floor_for(&position)
    }

    /// Rung summary, `"disabled"` without a ladder, `None` when unregistered.
    pub async fn status(&self, symbol: &Symbol) -> Option<String> {
        let position = self.registry.get(symbol).await?;
        Some(match &position.take_profit_ladder {
            Some(ladder) => ladder.status(),
            None => "disabled".to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_domain::{Quantity, Side};
    use ratchet_engine::RiskParameterStore;
    use ratchet_exec::StubExchange;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn manager() -> (Arc<PositionRegistry>, TakeProfitManager<StubExchange>) {
        let exchange = Arc::new(StubExchange::new(dec!(51300)));
        let gateway = Arc::new(Gateway::new(exchange, Duration::from_secs(1), CancellationToken::new()));
        let registry = Arc::new(PositionRegistry::new());
        let bus = Arc::new(EventBus::new(100));
        let controller = Arc::new(StopLossController::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            Arc::new(RiskParameterStore::builtin()),
            Arc::clone(&bus),
        ));
        let tp = TakeProfitManager::new(gateway, Arc::clone(&registry), controller, bus, LadderConfig::default());
        (registry, tp)
    }

    fn position(stop: Decimal) -> Position {
        Position::new(
            Symbol::parse("BTCUSDT").unwrap(),
            Side::Long,
            Price::new(dec!(50000)).unwrap(),
            Quantity::new(dec!(1)).unwrap(),
            Price::new(stop).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_initialize_builds_targets() {
        let (_, tp) = manager();
        let mut pos = position(dec!(48750));

        tp.initialize(&mut pos).unwrap();

        let ladder = pos.take_profit_ladder.unwrap();
        let targets: Vec<_> = ladder.levels.iter().map(|l| l.target_price.as_decimal()).collect();
        assert_eq!(targets, vec![dec!(51250), dec!(52500), dec!(53750)]);
    }

    #[test]
    fn test_initialize_rejects_zero_risk() {
        let (_, tp) = manager();
        let mut pos = position(dec!(50000));

        assert!(matches!(tp.initialize(&mut pos), Err(DaemonError::Domain(_))));
        assert!(pos.take_profit_ladder.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_without_ladder_is_noop() {
        let (registry, tp) = manager();
        let symbol = Symbol::parse("BTCUSDT").unwrap();
        registry.register(position(dec!(48750))).await;

        assert_eq!(tp.evaluate(&symbol, Price::new(dec!(60000)).unwrap()).await.unwrap(), 0);
        assert_eq!(tp.status(&symbol).await.as_deref(), Some("disabled"));
    }

    #[tokio::test]
    async fn test_initialize_for_registered_position() {
        let (registry, tp) = manager();
        let symbol = Symbol::parse("BTCUSDT").unwrap();
        registry.register(position(dec!(48750))).await;

        assert!(tp.initialize_for(&symbol).await.unwrap());
        assert!(!tp.initialize_for(&Symbol::parse("ETHUSDT").unwrap()).await.unwrap());
        assert_eq!(
            tp.status(&symbol).await.as_deref(),
            Some("L1 pending, L2 pending, L3 pending")
        );
        assert!(tp.floor(&symbol).await.is_none());
    }
}
