//! E2E test: ATR stop placement, trailing, and rejection of loosening.
//!
//! Flow (BTC long, ATR 500, multiplier 2.5):
//! 1. Open at 50000 -> initial stop 48750 rests at the venue
//! 2. Price 52000 -> trailing stop 50750 replaces it
//! 3. Price 53000 -> trailing stop 51750 replaces it
//! 4. Request to move back to 50750 -> rejected, nothing changes

use std::sync::Arc;

use ratchet_domain::{Price, Quantity, Side, StopSource, StopState, Symbol};
use ratchet_engine::RiskParameterStore;
use ratchet_exec::StubExchange;
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
    let mut config = Config::test();
    config.risk.take_profit_enabled = false;

    let exchange = Arc::new(StubExchange::new(dec!(50000)));
    let manager = PositionManager::new(
        Arc::clone(&exchange),
        Arc::new(RiskParameterStore::builtin()),
        Arc::new(EventBus::new(100)),
        &config,
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

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_btc_long_lifecycle() {
    let (exchange, manager) = setup();
    let mut events = manager.event_bus().subscribe();

    // 1. Initial stop
    open(&manager, Side::Long).await;
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(48750));
    assert_eq!(pos.state, StopState::Active);

    // 2. Price rises to 52000
    let tick = manager.on_price_tick(&btc(), p(dec!(52000))).await.unwrap();
    assert_eq!(tick, TickOutcome::Holding { extreme_updated: true });

    let outcome = manager.recalculate_trailing(&btc(), dec!(500)).await.unwrap();
    match outcome {
        StopUpdateOutcome::Applied { old_stop, new_stop, .. } => {
            assert_eq!(old_stop.as_decimal(), dec!(48750));
            assert_eq!(new_stop.as_decimal(), dec!(50750));
        },
        other => panic!("Expected Applied, got {other:?}"),
    }

    // 3. Price rises to 53000
    manager.on_price_tick(&btc(), p(dec!(53000))).await.unwrap();
    let outcome = manager.recalculate_trailing(&btc(), dec!(500)).await.unwrap();
    assert!(matches!(
        outcome,
        StopUpdateOutcome::Applied { new_stop, .. } if new_stop.as_decimal() == dec!(51750)
    ));

    // 4. Moving back down is rejected
    let err = manager
        .request_stop_update(&btc(), p(dec!(50750)), "decision process wants room")
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::InvalidDirection { .. }));

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(51750));
    assert_eq!(pos.extreme_price.as_decimal(), dec!(53000));

    let history: Vec<_> = pos.stop_loss_history.iter().map(|e| e.new_stop.as_decimal()).collect();
    assert_eq!(history, vec![dec!(48750), dec!(50750), dec!(51750)]);
    assert!(pos.stop_loss_history.iter().all(|e| e.applied));
    assert_eq!(pos.stop_loss_history[1].source, StopSource::Trailing);

    // Exactly one resting order, at the latest stop
    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].stop_price.as_decimal(), dec!(51750));
    assert_eq!(Some(resting[0].order_id.clone()), pos.stop_order_id);

    let updates = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, RiskEvent::StopUpdated { .. }))
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn test_btc_short_lifecycle() {
    let (exchange, manager) = setup();

    open(&manager, Side::Short).await;
    assert_eq!(
        manager.get_position(&btc()).await.unwrap().current_stop_loss.as_decimal(),
        dec!(51250)
    );

    manager.on_price_tick(&btc(), p(dec!(48000))).await.unwrap();
    let outcome = manager.recalculate_trailing(&btc(), dec!(500)).await.unwrap();
    assert!(matches!(
        outcome,
        StopUpdateOutcome::Applied { new_stop, .. } if new_stop.as_decimal() == dec!(49250)
    ));

    // Raising a short stop is loosening
    let err = manager
        .request_stop_update(&btc(), p(dec!(50000)), "widen")
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::InvalidDirection { .. }));

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].stop_price.as_decimal(), dec!(49250));
}

#[tokio::test]
async fn test_extreme_tracked_while_update_deferred() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;

    // 50100 - 1250 = 48850, only ~0.2 % above 48750
    manager.on_price_tick(&btc(), p(dec!(50100))).await.unwrap();
    let outcome = manager.recalculate_trailing(&btc(), dec!(500)).await.unwrap();
    assert!(matches!(outcome, StopUpdateOutcome::Deferred { .. }));

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.extreme_price.as_decimal(), dec!(50100));
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(48750));
    assert_eq!(pos.computed_stop_loss.map(|s| s.as_decimal()), Some(dec!(48850)));
    assert_eq!(exchange.cancel_count(), 0);

    // A pullback does not move the extreme
    manager.on_price_tick(&btc(), p(dec!(49900))).await.unwrap();
    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.extreme_price.as_decimal(), dec!(50100));
    assert_eq!(pos.current_price.as_decimal(), dec!(49900));
}

#[tokio::test]
async fn test_update_exactly_at_threshold_is_applied() {
    let (_, manager) = setup();
    open(&manager, Side::Long).await;

    // 48750 * 1.003 = 48896.25
    let outcome = manager
        .request_stop_update(&btc(), p(dec!(48896.25)), "exact threshold")
        .await
        .unwrap();

    assert!(matches!(outcome, StopUpdateOutcome::Applied { .. }));
}

#[tokio::test]
async fn test_stray_tick_after_close_is_ignored() {
    let (exchange, manager) = setup();
    open(&manager, Side::Long).await;

    exchange.set_price("BTCUSDT", dec!(48700));
    let closed = manager.on_price_tick(&btc(), p(dec!(48700))).await.unwrap();
    assert!(matches!(closed, TickOutcome::Closed { .. }));

    assert_eq!(manager.on_price_tick(&btc(), p(dec!(48600))).await.unwrap(), TickOutcome::NotFound);
    assert_eq!(
        manager.request_stop_update(&btc(), p(dec!(49000)), "late").await.unwrap(),
        StopUpdateOutcome::NotFound
    );
    assert_eq!(exchange.market_closes().len(), 1);
}

#[tokio::test]
async fn test_concurrent_updates_leave_one_order() {
    let (exchange, manager) = setup();
    let manager = Arc::new(manager);
    open(&manager, Side::Long).await;

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let stop = p(dec!(49000) + Decimal::from(i * 200));
            tokio::spawn(async move {
                let _ = manager.request_stop_update(&btc(), stop, "concurrent").await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let pos = manager.get_position(&btc()).await.unwrap();
    assert_eq!(pos.current_stop_loss.as_decimal(), dec!(50000));

    let resting = exchange.resting_stops("BTCUSDT");
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].stop_price.as_decimal(), dec!(50000));

    // History only ever tightens
    let applied: Vec<_> = pos
        .stop_loss_history
        .iter()
        .filter(|e| e.applied)
        .map(|e| e.new_stop)
        .collect();
    assert!(applied.windows(2).all(|w| w[0] < w[1]));
}
