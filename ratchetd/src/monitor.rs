//! Position Monitor: the fixed-interval scan over every open position.
//!
//! Symbols are processed one after another, never in parallel. Per symbol:
//!
//! ```text
//! repair missing stop → fetch price → ladder → price tick → trailing
//! ```
//!
//! The ladder runs before the trailing recalculation so a freshly
//! installed floor is already in force when the trailing stop is clamped.
//! A failure on one symbol is logged and the scan moves on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ratchet_domain::Symbol;
use ratchet_exec::{ExchangeGateway, ExecError, MarketDataSource};

use crate::config::Config;
use crate::controller::{StopUpdateOutcome, TickOutcome};
use crate::error::{DaemonError, DaemonResult};
use crate::position_manager::PositionManager;

// =============================================================================
// Scan Report
// =============================================================================

/// Counters for one pass over the registry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Symbols visited
    pub scanned: usize,
    /// Take-profit rungs executed
    pub rungs_executed: usize,
    /// Trailing stops replaced
    pub stops_updated: usize,
    /// Positions closed by their stop
    pub closed: usize,
    /// Symbols whose processing failed
    pub failed: usize,
    /// Scan cut short by shutdown
    pub interrupted: bool,
}

// =============================================================================
// Monitor
// =============================================================================

/// Background loop driving ladders, stop checks and trailing.
pub struct PositionMonitor<E: ExchangeGateway + 'static> {
    manager: Arc<PositionManager<E>>,
    market_data: Option<Arc<dyn MarketDataSource>>,
    poll_interval: Duration,
    trailing_enabled: bool,
    shutdown: CancellationToken,
}

impl<E: ExchangeGateway + 'static> PositionMonitor<E> {
    /// Create a monitor. Trailing needs a market data source.
    pub fn new(
        manager: Arc<PositionManager<E>>,
        market_data: Option<Arc<dyn MarketDataSource>>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            market_data,
            poll_interval: config.monitor.poll_interval,
            trailing_enabled: config.risk.trailing_enabled,
            shutdown,
        }
    }

    /// Spawn the loop on the runtime.
    ///
    /// Returns a JoinHandle that resolves once shutdown has been observed.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Scan every `poll_interval` until the shutdown token fires.
    ///
    /// A scan that is already running finishes before the loop exits.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            trailing = self.trailing_enabled && self.market_data.is_some(),
            "Position monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Position monitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let report = self.run_once().await;
            if report.scanned > 0 {
                debug!(
                    scanned = report.scanned,
                    rungs = report.rungs_executed,
                    stops_updated = report.stops_updated,
                    closed = report.closed,
                    failed = report.failed,
                    "Scan complete"
                );
            }
        }

        info!("Position monitor stopped");
    }

    /// One sequential pass over a snapshot of the registry.
    pub async fn run_once(&self) -> ScanReport {
        let mut report = ScanReport::default();

        for symbol in self.manager.symbols().await {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }
            report.scanned += 1;

            match self.process_symbol(&symbol, &mut report).await {
                Ok(()) => {},
                Err(DaemonError::Shutdown) => {
                    info!(%symbol, "Scan interrupted by shutdown");
                    report.interrupted = true;
                    break;
                },
                Err(e) => {
                    report.failed += 1;
                    error!(%symbol, error = %e, "Symbol processing failed, retrying next tick");
                },
            }
        }

        report
    }

    async fn process_symbol(&self, symbol: &Symbol, report: &mut ScanReport) -> DaemonResult<()> {
        if let Err(e) = self.manager.ensure_protected(symbol).await {
            tolerate(symbol, "ensure_protected", e)?;
        }

        let price = self
            .manager
            .gateway()
            .price(symbol)
            .await
            .map_err(|e| gateway_error("get_price", symbol, e))?;

        match self.manager.evaluate_take_profit(symbol, price).await {
            Ok(executed) => report.rungs_executed += executed,
            Err(e) => tolerate(symbol, "take_profit", e)?,
        }

        match self.manager.on_price_tick(symbol, price).await? {
            TickOutcome::Closed { .. } => {
                report.closed += 1;
                return Ok(());
            },
            TickOutcome::NotFound => return Ok(()),
            TickOutcome::Holding { .. } => {},
        }

        if !self.trailing_enabled {
            return Ok(());
        }
        let Some(market_data) = &self.market_data else {
            return Ok(());
        };

        let period = self.manager.params().lookup(symbol).trailing_atr_period;
        let atr = self
            .manager
            .gateway()
            .cancellable("atr", market_data.atr(symbol, period))
            .await
            .map_err(|e| gateway_error("atr", symbol, e))?;

        if let StopUpdateOutcome::Applied { .. } =
            self.manager.recalculate_trailing(symbol, atr).await?
        {
            report.stops_updated += 1;
        }

        Ok(())
    }
}

/// Log a non-fatal stage failure, pass shutdown through.
fn tolerate(symbol: &Symbol, stage: &str, error: DaemonError) -> DaemonResult<()> {
    if matches!(error, DaemonError::Shutdown) {
        return Err(error);
    }
    warn!(%symbol, %stage, error = %error, "Stage failed, continuing scan");
    Ok(())
}

fn gateway_error(operation: &'static str, symbol: &Symbol, error: ExecError) -> DaemonError {
    match error {
        ExecError::Cancelled(_) => DaemonError::Shutdown,
        source => DaemonError::Gateway {
            operation,
            symbol: symbol.clone(),
            source,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_domain::{Price, Quantity, Side};
    use ratchet_engine::RiskParameterStore;
    use ratchet_exec::{StubExchange, StubMarketData};
    use rust_decimal_macros::dec;

    use crate::event_bus::EventBus;

    struct Fixture {
        exchange: Arc<StubExchange>,
        market_data: Arc<StubMarketData>,
        manager: Arc<PositionManager<StubExchange>>,
        monitor: Arc<PositionMonitor<StubExchange>>,
        shutdown: CancellationToken,
    }

    fn fixture() -> Fixture {
        let config = Config::test();
        let shutdown = CancellationToken::new();
        let exchange = Arc::new(StubExchange::new(dec!(50000)));
        let market_data = Arc::new(StubMarketData::new());
        let manager = Arc::new(PositionManager::new(
            Arc::clone(&exchange),
            Arc::new(RiskParameterStore::builtin()),
            Arc::new(EventBus::new(100)),
            &config,
            shutdown.clone(),
        ));
        let monitor = Arc::new(PositionMonitor::new(
            Arc::clone(&manager),
            Some(Arc::clone(&market_data) as Arc<dyn MarketDataSource>),
            &config,
            shutdown.clone(),
        ));
        Fixture {
            exchange,
            market_data,
            manager,
            monitor,
            shutdown,
        }
    }

    async fn open_btc(fx: &Fixture) {
        fx.manager
            .open_position(
                Symbol::parse("BTCUSDT").unwrap(),
                Side::Long,
                Price::new(dec!(50000)).unwrap(),
                Quantity::new(dec!(1)).unwrap(),
                dec!(500),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_registry_scan() {
        let fx = fixture();
        assert_eq!(fx.monitor.run_once().await, ScanReport::default());
    }

    #[tokio::test]
    async fn test_scan_trails_stop_with_atr_period() {
        let fx = fixture();
        fx.market_data.set_atr("BTCUSDT", dec!(500));
        open_btc(&fx).await;

        // Below rung 1 (51250) so only the trailing stop moves
        fx.exchange.set_price("BTCUSDT", dec!(51000));
        let report = fx.monitor.run_once().await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.stops_updated, 1);
        assert_eq!(fx.market_data.last_period(), Some(3));
        let resting = fx.exchange.resting_stops("BTCUSDT");
        assert_eq!(resting[0].stop_price.as_decimal(), dec!(49750));
    }

    #[tokio::test]
    async fn test_market_data_failure_is_isolated() {
        let fx = fixture();
        open_btc(&fx).await;
        fx.market_data.set_fail_next(true);

        let report = fx.monitor.run_once().await;

        assert_eq!(report.failed, 1);
        assert!(fx.manager.get_position(&Symbol::parse("BTCUSDT").unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn test_stop_hit_closes_during_scan() {
        let fx = fixture();
        open_btc(&fx).await;
        fx.exchange.set_price("BTCUSDT", dec!(48000));

        let report = fx.monitor.run_once().await;

        assert_eq!(report.closed, 1);
        assert!(fx.manager.get_all_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_interrupts_scan() {
        let fx = fixture();
        open_btc(&fx).await;
        fx.shutdown.cancel();

        let report = fx.monitor.run_once().await;

        assert!(report.interrupted);
        assert_eq!(report.scanned, 0);
    }
}
