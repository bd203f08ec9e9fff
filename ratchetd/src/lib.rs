//! Ratchet Daemon Library
//!
//! Runtime that keeps open positions protected by a stop-loss which only
//! ever tightens, and takes profit in staged rungs.
//!
//! # Architecture
//!
//! ```text
//! Decision process → Position Manager → Stop-Loss Controller → Gateway → Exchange
//!                          ↑                   ↑ floor
//!                   Position Monitor → Take-Profit Manager
//!                          ↓
//!                      Event Bus (dashboards, persistence)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Position Manager**: Facade used by the decision process
//! - **Registry**: Open positions, one lock per position
//! - **Controller**: Stop placement, replacement and triggered exits
//! - **Take Profit**: Ladder execution and floor installation
//! - **Monitor**: Fixed-interval scan over the registry
//! - **Gateway**: Deadlines and cooperative cancellation for venue calls
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use ratchetd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config).expect("Failed to build daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod gateway;
pub mod monitor;
pub mod position_manager;
pub mod registry;
pub mod take_profit;

// Re-exports for convenience
pub use config::{Config, Environment, MonitorConfig, RiskConfig};
pub use controller::{FloorProvider, LadderFloor, StopLossController, StopUpdateOutcome, TickOutcome};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{EventBus, EventReceiver, Lagged, RiskEvent};
pub use gateway::Gateway;
pub use monitor::{PositionMonitor, ScanReport};
pub use position_manager::PositionManager;
pub use registry::{PositionHandle, PositionRegistry};
pub use take_profit::TakeProfitManager;
