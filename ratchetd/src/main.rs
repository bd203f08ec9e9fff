//! Ratchet Daemon
//!
//! Stop-loss and take-profit runtime for open positions.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p ratchetd
//!
//! # Faster scans, JSON logs
//! RATCHET_POLL_INTERVAL_SECS=2 RATCHET_LOG_JSON=1 cargo run -p ratchetd
//! ```
//!
//! # Environment Variables
//!
//! - `RATCHET_ENV`: Environment (test, development, production)
//! - `RATCHET_POLL_INTERVAL_SECS`: Scan interval (default: 10)
//! - `RATCHET_CALL_TIMEOUT_SECS`: Deadline per exchange call (default: 5)
//! - `RATCHET_TAKE_PROFIT_ENABLED`: Attach take-profit ladders (default: true)
//! - `RATCHET_TRAILING_ENABLED`: Trail stops by ATR (default: true)
//! - `RATCHET_RISK_PARAMS_PATH`: JSON parameter table (default: built-in)
//! - `RATCHET_LOG_JSON`: JSON log lines (default: false)

use ratchetd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("ratchetd=info".parse()?);
    if config.log_json {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Ratchet daemon"
    );

    // Create and run daemon
    let daemon = Daemon::new_stub(config)?;
    daemon.run().await?;

    Ok(())
}
