//! Stub implementations for testing.
//!
//! These implementations simulate exchange and market data behavior
//! without making real API calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use ratchet_domain::{OrderSide, Price, Quantity, Symbol};

use crate::error::ExecError;
use crate::ports::{ExchangeGateway, MarketDataSource};

/// Gateway operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubOperation {
    /// `place_stop_order`
    PlaceStop,
    /// `cancel_order`
    Cancel,
    /// `place_market_close`
    MarketClose,
    /// `get_price`
    GetPrice,
}

/// A stop order resting in the stub book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestingStop {
    /// Stub order id
    pub order_id: String,
    /// Placement sequence number
    pub sequence: u64,
    /// Normalized pair
    pub symbol: String,
    /// Exit direction
    pub side: OrderSide,
    /// Trigger price
    pub stop_price: Price,
    /// Size closed on trigger
    pub quantity: Quantity,
    /// When it was placed
    pub placed_at: DateTime<Utc>,
}

/// A filled market close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketClose {
    /// Normalized pair
    pub symbol: String,
    /// Order direction
    pub side: OrderSide,
    /// Filled size
    pub quantity: Quantity,
    /// Fill price
    pub fill_price: Price,
}

// =============================================================================
// Stub Exchange
// =============================================================================

/// Stub exchange for testing.
///
/// Keeps a book of resting stop orders, fills market closes at the
/// configured price, and supports per-operation failure and per-symbol
/// latency injection.
pub struct StubExchange {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Decimal>>,
    /// Default price for unknown symbols
    default_price: Decimal,
    /// Order counter for generating IDs
    order_counter: RwLock<u64>,
    /// Operations whose next call fails
    fail_next: RwLock<HashSet<StubOperation>>,
    /// Artificial delay before answering, by symbol
    latency: RwLock<HashMap<String, Duration>>,
    /// Resting stop orders by order id
    stops: RwLock<HashMap<String, RestingStop>>,
    /// Every market close filled so far
    closes: RwLock<Vec<MarketClose>>,
    /// Successful cancellations
    cancel_count: RwLock<u64>,
}

impl StubExchange {
    /// Create a new stub exchange with default price.
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            default_price,
            order_counter: RwLock::new(0),
            fail_next: RwLock::new(HashSet::new()),
            latency: RwLock::new(HashMap::new()),
            stops: RwLock::new(HashMap::new()),
            closes: RwLock::new(Vec::new()),
            cancel_count: RwLock::new(0),
        }
    }

    /// Set price for a symbol, any accepted spelling.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(Symbol::normalize(symbol), price);
    }

    /// Get price for a symbol (or default).
    pub fn get_price_decimal(&self, symbol: &str) -> Decimal {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(&Symbol::normalize(symbol)).copied().unwrap_or(self.default_price)
    }

    /// Configure the next call of `operation` to fail.
    pub fn set_fail_next(&self, operation: StubOperation, fail: bool) {
        let mut fail_next = self.fail_next.write().unwrap_or_else(PoisonError::into_inner);
        if fail {
            fail_next.insert(operation);
        } else {
            fail_next.remove(&operation);
        }
    }

    /// Delay every call for `symbol` by `delay`.
    pub fn set_latency(&self, symbol: &str, delay: Duration) {
        let mut latency = self.latency.write().unwrap_or_else(PoisonError::into_inner);
        latency.insert(Symbol::normalize(symbol), delay);
    }

    /// Resting stops for `symbol`, oldest first.
    pub fn resting_stops(&self, symbol: &str) -> Vec<RestingStop> {
        let key = Symbol::normalize(symbol);
        let stops = self.stops.read().unwrap_or_else(PoisonError::into_inner);
        let mut resting: Vec<RestingStop> =
            stops.values().filter(|s| s.symbol == key).cloned().collect();
        resting.sort_by_key(|s| s.sequence);
        resting
    }

    /// Market closes filled so far.
    pub fn market_closes(&self) -> Vec<MarketClose> {
        self.closes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of successful cancellations.
    pub fn cancel_count(&self) -> u64 {
        *self.cancel_count.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a unique order ID with its sequence number.
    fn next_order_id(&self) -> (u64, String) {
        let mut counter = self.order_counter.write().unwrap_or_else(PoisonError::into_inner);
        *counter += 1;
        (*counter, format!("STUB-{}", *counter))
    }

    /// Check if we should fail this operation, clearing the flag.
    fn should_fail(&self, operation: StubOperation) -> bool {
        let mut fail_next = self.fail_next.write().unwrap_or_else(PoisonError::into_inner);
        fail_next.remove(&operation)
    }

    async fn simulate_latency(&self, symbol: &Symbol) {
        let delay = {
            let latency = self.latency.read().unwrap_or_else(PoisonError::into_inner);
            latency.get(&symbol.as_pair()).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn current_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        Price::new(self.get_price_decimal(&symbol.as_pair()))
            .map_err(|e| ExecError::Exchange(format!("Stub has no price for {symbol}: {e}")))
    }
}

#[async_trait]
impl ExchangeGateway for StubExchange {
    async fn place_stop_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        stop_price: Price,
        quantity: Quantity,
    ) -> Result<String, ExecError> {
        self.simulate_latency(symbol).await;

        if self.should_fail(StubOperation::PlaceStop) {
            return Err(ExecError::Exchange("Simulated stop placement failure".to_string()));
        }

        let (sequence, order_id) = self.next_order_id();
        let order = RestingStop {
            order_id: order_id.clone(),
            sequence,
            symbol: symbol.as_pair(),
            side,
            stop_price,
            quantity,
            placed_at: Utc::now(),
        };
        self.stops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order_id.clone(), order);

        tracing::debug!(%symbol, %order_id, %stop_price, "Stub: stop order placed");
        Ok(order_id)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExecError> {
        self.simulate_latency(symbol).await;

        if self.should_fail(StubOperation::Cancel) {
            return Err(ExecError::Exchange("Simulated cancel failure".to_string()));
        }

        let removed = self.stops.write().unwrap_or_else(PoisonError::into_inner).remove(order_id);
        if removed.is_none() {
            return Err(ExecError::OrderRejected(format!("Unknown order {order_id}")));
        }

        *self.cancel_count.write().unwrap_or_else(PoisonError::into_inner) += 1;
        tracing::debug!(%symbol, order_id, "Stub: order cancelled");
        Ok(())
    }

    async fn place_market_close(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
    ) -> Result<Price, ExecError> {
        self.simulate_latency(symbol).await;

        if self.should_fail(StubOperation::MarketClose) {
            return Err(ExecError::Exchange("Simulated market close failure".to_string()));
        }

        let fill_price = self.current_price(symbol)?;
        self.closes.write().unwrap_or_else(PoisonError::into_inner).push(MarketClose {
            symbol: symbol.as_pair(),
            side,
            quantity,
            fill_price,
        });

        Ok(fill_price)
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        self.simulate_latency(symbol).await;

        if self.should_fail(StubOperation::GetPrice) {
            return Err(ExecError::Exchange("Simulated price fetch failure".to_string()));
        }

        self.current_price(symbol)
    }
}

// =============================================================================
// Stub Market Data
// =============================================================================

/// Stub ATR source for testing.
pub struct StubMarketData {
    /// ATR by symbol
    atr: RwLock<HashMap<String, Decimal>>,
    /// Whether the next call fails
    fail_next: RwLock<bool>,
    /// Last period asked for
    last_period: RwLock<Option<u32>>,
}

impl StubMarketData {
    /// Create an empty source; every symbol must be seeded with `set_atr`.
    pub fn new() -> Self {
        Self {
            atr: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(false),
            last_period: RwLock::new(None),
        }
    }

    /// Set the ATR reported for `symbol`.
    pub fn set_atr(&self, symbol: &str, atr: Decimal) {
        let mut map = self.atr.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(Symbol::normalize(symbol), atr);
    }

    /// Configure the next call to fail.
    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.write().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Period of the most recent request.
    pub fn last_period(&self) -> Option<u32> {
        *self.last_period.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StubMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for StubMarketData {
    async fn atr(&self, symbol: &Symbol, period: u32) -> Result<Decimal, ExecError> {
        *self.last_period.write().unwrap_or_else(PoisonError::into_inner) = Some(period);

        let fail = std::mem::take(&mut *self.fail_next.write().unwrap_or_else(PoisonError::into_inner));
        if fail {
            return Err(ExecError::MarketData("Simulated ATR failure".to_string()));
        }

        let map = self.atr.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&symbol.as_pair())
            .copied()
            .ok_or_else(|| ExecError::MarketData(format!("No ATR for {symbol}")))
    }
}

// =============================================================================
// Tests
// =============================================================================
