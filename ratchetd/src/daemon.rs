//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Position Manager (registry, stop controller, take-profit ladder)
//! - Position Monitor (fixed-interval scan)
//! - Event Bus (decision log for collaborators)
//!
//! # Lifecycle
//!
//! 1. Load configuration and the risk parameter table
//! 2. Initialize components
//! 3. Start the position monitor
//! 4. Wait for SIGINT
//! 5. Cancel the shutdown token and let the in-flight scan finish

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ratchet_exec::{ExchangeGateway, MarketDataSource, StubExchange, StubMarketData};

use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, RiskEvent};
use crate::monitor::PositionMonitor;
use crate::position_manager::PositionManager;

// =============================================================================
// Daemon
// =============================================================================

/// The main ratchet daemon.
pub struct Daemon<E: ExchangeGateway + 'static> {
    /// Configuration
    config: Config,
    /// Position manager
    position_manager: Arc<PositionManager<E>>,
    /// Position monitor
    monitor: Arc<PositionMonitor<E>>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Shutdown signal shared by the monitor and the gateway
    shutdown: CancellationToken,
}

impl Daemon<StubExchange> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let exchange = Arc::new(StubExchange::new(rust_decimal_macros::dec!(50000)));
        let market_data: Arc<dyn MarketDataSource> = Arc::new(StubMarketData::new());
        Self::new(config, exchange, Some(market_data))
    }
}

impl<E: ExchangeGateway + 'static> Daemon<E> {
    /// Create a daemon around an exchange adapter.
    ///
    /// # Errors
    /// `Config` if the configured parameter file cannot be loaded.
    pub fn new(
        config: Config,
        exchange: Arc<E>,
        market_data: Option<Arc<dyn MarketDataSource>>,
    ) -> DaemonResult<Self> {
        let params = Arc::new(config.risk_store()?);
        let event_bus = Arc::new(EventBus::default());
        let shutdown = CancellationToken::new();

        let position_manager = Arc::new(PositionManager::new(
            exchange,
            params,
            Arc::clone(&event_bus),
            &config,
            shutdown.clone(),
        ));
        let monitor = Arc::new(PositionMonitor::new(
            Arc::clone(&position_manager),
            market_data,
            &config,
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            position_manager,
            monitor,
            event_bus,
            shutdown,
        })
    }

    /// Position manager, for the decision process.
    pub fn position_manager(&self) -> &Arc<PositionManager<E>> {
        &self.position_manager
    }

    /// Event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT or the
    /// shutdown token).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            poll_interval_ms = self.config.monitor.poll_interval.as_millis() as u64,
            take_profit = self.config.risk.take_profit_enabled,
            trailing = self.config.risk.trailing_enabled,
            "Starting ratchet daemon"
        );

        let monitor_task = Arc::clone(&self.monitor).start();
        let mut events = self.event_bus.subscribe();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    self.shutdown.cancel();
                    break;
                }

                Some(event) = events.recv() => {
                    match event {
                        Ok(RiskEvent::ProtectionLost { symbol, error, .. }) => {
                            error!(%symbol, %error, "Position left without a resting stop");
                        },
                        Ok(_) => {},
                        Err(lag_msg) => warn!(%lag_msg, "Event receiver lagged"),
                    }
                }
            }
        }

        self.shutdown().await;

        monitor_task.await.map_err(|e| DaemonError::Config(format!("Monitor task failed: {e}")))?;
        info!("Daemon stopped");
        Ok(())
    }

    async fn shutdown(&self) {
        let open = self.position_manager.get_all_positions().await;
        if open.is_empty() {
            info!("No open positions at shutdown");
            return;
        }

        // Stop orders keep resting at the venue after exit
        for position in &open {
            info!(
                symbol = %position.symbol,
                stop = %position.current_stop_loss,
                order_id = ?position.stop_order_id,
                take_profit = %position
                    .take_profit_ladder
                    .as_ref()
                    .map(|l| l.status())
                    .unwrap_or_else(|| "disabled".to_string()),
                "Open position left under venue stop"
            );
        }
    }
}
