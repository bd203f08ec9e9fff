//! Take-profit ladder execution and its floor on the stop.
//!
//! BTC long at 50000 with stop 48750 (risk 1250):
//!
//! ```text
//! rung  target  close  floor
//! L1    51250   30 %   50000
//! L2    52500   30 %   51250
//! L3    53750   rest   52500
//! ```

use std::sync::Arc;

use ratchet_domain::{OrderSide, Price, Quantity, Side, StopSource, Symbol};
use ratchet_engine::RiskParameterStore;
use ratchet_exec::{StubExchange, StubOperation};
use ratchetd::{
    Config, DaemonError, EventBus, PositionManager, RiskEvent, StopUpdateOutcome, TickOutcome,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Helpers
// =============================================================================

fn setup() -> (Arc<StubExchange>, PositionManager<StubExchange>) {
    let exchange = Arc::new(StubExchange::new(dec!(50000)));
    let manager = PositionManager::new(
        Arc::clone(&exchange),
        Arc::new(RiskParameterStore::builtin()),
        Arc::new(EventBus::new(100)),
        &Config::test(),
        CancellationToken::new(),
    );
    (exchange, manager)
}

fn btc() -> Symbol {
    Symbol::from_pair("BTCUSDT").unwrap()
}

fn p(v: Decimal) -> Price {
    Price::new(v).unwrap()
}

async fn open(manager: &PositionManager<StubExchange>, side: Side) {
    manager
        .open_position(btc(), side, p(dec!(50000)), Quantity::new(dec!(1)).unwrap(), dec!(500))
        .await
        .unwrap();
}

async fn evaluate_at(
    exchange: &StubExchange,
    manager: &PositionManager<StubExchange>,
    price: Decimal,
) -> Result<usize, DaemonError> {
    exchange.set_price("BTCUSDT", price);
    manager.evaluate_take_profit(&btc(), p(price)).await
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_ladder_long() {
    let (exchange, manager) = setup();
    let mut events = manager.event_bus().subscribe();
    open(&manager, Side::Long).await;

    assert_eq!(
        manager.get_take_profit_status(&btc()).await.as_deref(),
        Some("L1 pending, L2 pending, L3 pending")
    );
    assert!(manager.get_take_profit_floor(&btc()).await.is_none());

    // L1
    assert_eq!(evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap(), 1);
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.quantity.as_decimal(), dec!(0.7));
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(50000));
    assert_eq!(pos.stop_loss_history.last().unwrap().source, StopSource::TakeProfit);
    assert_eq!(manager.get_take_profit_floor(&btc()).await.map(|f| f.as_decimal()), Some(dec!(50000)));
    assert_eq!(
        manager.get_take_profit_status(&btc()).await.as_deref(),
        Some("L1 done, L2 pending, L3 pending")
    );

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].quantity.as_decimal(), dec!(0.7));

    // Not yet at L2
    assert_eq!(evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap(), 0);

    // Price gaps past L2 and L3: one rung per evaluation
    assert_eq!(evaluate_at(&exchange, &manager, dec!(53800)).await.unwrap(), 1);
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.quantity.as_decimal(), dec!(0.4));
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(51250));

    // L3 closes the remainder
    assert_eq!(evaluate_at(&exchange, &manager, dec!(53800)).await.unwrap(), 1);
    assert!(manager.get_position(&btc()).await.is_none());
    assert!(exchange.resting_stops("BTCUSDT").is_empty());

    let closed: Vec<_> = exchange.market_closes().iter().map(|c| c.quantity.as_decimal()).collect();
    assert_eq!(closed, vec![dec!(0.3), dec!(0.3), dec!(0.4)]);
    assert_eq!(closed.iter().copied().sum::<Decimal>(), dec!(1));

    let events = events.drain();
    let executed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RiskEvent::TakeProfitExecuted { level, remaining, realized_pnl, .. } => {
                Some((*level, remaining.as_decimal(), *realized_pnl))
            },
            _ => None,
        })
        .collect();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0], (1, dec!(0.7), dec!(390)));
    assert_eq!(executed[2].0, 3);
    assert!(executed[2].1.is_zero());
    assert!(matches!(events.last(), Some(RiskEvent::PositionClosed { .. })));
}

#[tokio::test]
async fn test_floor_blocks_lower_stops() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;
    evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap();

    // External proposal under the floor
    let err = manager
        .request_stop_update(&btc(), p(dec!(49000)), "give it room")
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::BelowFloor { .. }));

    // Wide ATR: 51300 - 2.5 x 1000 = 48800, clamped to 50000, no change
    manager.on_price_tick(&btc(), p(dec!(51300))).await.unwrap();
    let outcome = manager.recalculate_trailing(&btc(), dec!(1000)).await.unwrap();
    assert!(matches!(outcome, StopUpdateOutcome::Held { .. }));

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(50000));
    assert!(pos
        .stop_loss_history
        .iter()
        .skip_while(|e| e.source != StopSource::TakeProfit)
        .all(|e| e.new_stop.as_decimal() >= dec!(50000)));
}

#[tokio::test]
async fn test_failed_partial_close_keeps_rung_pending() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;

    exchange.set_fail_next(StubOperation::MarketClose, true);
    let err = evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap_err();
    assert!(matches!(err, DaemonError::Gateway { operation: "place_market_close", .. }));

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.quantity.as_decimal(), dec!(1));
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(48750));
    assert_eq!(
        manager.get_take_profit_status(&btc()).await.as_deref(),
        Some("L1 pending, L2 pending, L3 pending")
    );

    // Retried on the next evaluation
    assert_eq!(evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_short_ladder_floor() {
    let (exchange, manager) = setup();
    open(&manager, Side::Short).await;

    // Short targets: 48750, 47500, 46250
    assert_eq!(evaluate_at(&exchange, &manager, dec!(48800)).await.unwrap(), 0);
    assert_eq!(evaluate_at(&exchange, &manager, dec!(48700)).await.unwrap(), 1);

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(50000));

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].side, OrderSide::Buy);
    assert_eq!(exchange.market_closes()[0].side, OrderSide::Buy);
}

#[tokio::test]
async fn test_tighter_stop_is_resized_not_lowered() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;

    manager.request_stop_update(&btc(), p(dec!(50500)), "lock in").await.unwrap();
    evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap();

    // L1 floor (50000) is below the committed stop, which keeps its level
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(50500));

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].stop_price.as_decimal(), dec!(50500));
    assert_eq!(resting[0].quantity.as_decimal(), dec!(0.7));
}

#[tokio::test]
async fn test_floor_within_threshold_is_deferred_and_resized() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;

    manager.request_stop_update(&btc(), p(dec!(49900)), "lock in").await.unwrap();
    evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap();

    // 49900 -> 50000 is ~0.2 %, under the 0.3 % threshold
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(49900));
    assert_eq!(pos.computed_stop_loss.map(|s| s.as_decimal()), Some(dec!(50000)));

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].stop_price.as_decimal(), dec!(49900));
    assert_eq!(resting[0].quantity.as_decimal(), dec!(0.7));
}

#[tokio::test]
async fn test_stop_after_rung_closes_remainder() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;
    evaluate_at(&exchange, &manager, dec!(51300)).await.unwrap();

    exchange.set_price("BTCUSDT", dec!(49990));
    let outcome = manager.on_price_tick(&btc(), p(dec!(49990))).await.unwrap();

    match outcome {
        TickOutcome::Closed { quantity, .. } => assert_eq!(quantity.as_decimal(), dec!(0.7)),
        other => panic!("Expected Closed, got {other:?}"),
    }
    assert!(manager.get_take_profit_status(&btc()).await.is_none());
}
