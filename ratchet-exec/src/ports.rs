//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (exchange, market data).
//! Adapters implement these ports for specific services (stub, real venue).
//!
//! Deadlines and cancellation are applied by the caller: every future
//! returned here may be dropped mid-flight, so adapters must be cancel-safe.

use async_trait::async_trait;
use rust_decimal::Decimal;

use ratchet_domain::{OrderSide, Price, Quantity, Symbol};

use crate::error::ExecError;

// =============================================================================
// Exchange Gateway
// =============================================================================

/// Port for order placement at the venue.
///
/// Implementations:
/// - `StubExchange` - For testing (in-memory order book of resting stops)
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place a stop-market order that closes `quantity` when `stop_price` trades.
    ///
    /// # Returns
    ///
    /// The venue order id, used later to cancel it.
    async fn place_stop_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        stop_price: Price,
        quantity: Quantity,
    ) -> Result<String, ExecError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExecError>;

    /// Close `quantity` at market.
    ///
    /// # Returns
    ///
    /// The fill price.
    async fn place_market_close(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
    ) -> Result<Price, ExecError>;

    /// Get current price for a symbol.
    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError>;
}

// =============================================================================
// Market Data Source
// =============================================================================

/// Port for volatility readings.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Average True Range over the last `period` candles.
    async fn atr(&self, symbol: &Symbol, period: u32) -> Result<Decimal, ExecError>;
}
