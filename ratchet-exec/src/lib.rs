//! Ratchet Execution Layer
//!
//! Ports to the venue and the volatility feed, plus in-memory stubs.
//!
//! # Components
//!
//! - **Ports**: `ExchangeGateway` (stop orders, market closes, prices) and
//!   `MarketDataSource` (ATR readings)
//! - **Stub**: Test implementations with failure and latency injection
//!
//! # Example
//!
//! ```
//! use ratchet_domain::{OrderSide, Price, Quantity, Symbol};
//! use ratchet_exec::{ExchangeGateway, StubExchange};
//! use rust_decimal_macros::dec;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! rt.block_on(async {
//!     let exchange = StubExchange::new(dec!(50000));
//!     let symbol = Symbol::parse("BTC/USDT").unwrap();
//!
//!     let order_id = exchange
//!         .place_stop_order(
//!             &symbol,
//!             OrderSide::Sell,
//!             Price::new(dec!(48750)).unwrap(),
//!             Quantity::new(dec!(1)).unwrap(),
//!         )
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(exchange.resting_stops("BTCUSDT")[0].order_id, order_id);
//! });
//! # }
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use ports::{ExchangeGateway, MarketDataSource};
pub use stub::{MarketClose, RestingStop, StubExchange, StubMarketData, StubOperation};
