//! Deadline- and shutdown-aware access to the exchange gateway.
//!
//! Every call is bounded by `call_timeout`. Calls made through the
//! cancellable methods also abort as soon as the shutdown token fires;
//! the `_detached` variants ignore the token so that a cancel/replace pair,
//! once started, runs both halves to completion or their deadlines.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ratchet_domain::{OrderSide, Price, Quantity, Symbol};
use ratchet_exec::{ExchangeGateway, ExecError, ExecResult};

/// Exchange gateway with per-call deadlines.
pub struct Gateway<E: ExchangeGateway + 'static> {
    exchange: Arc<E>,
    call_timeout: Duration,
    shutdown: CancellationToken,
}

impl<E: ExchangeGateway + 'static> Gateway<E> {
    /// Wrap `exchange`.
    pub fn new(exchange: Arc<E>, call_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            exchange,
            call_timeout,
            shutdown,
        }
    }

    /// The wrapped exchange.
    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    /// Token that aborts cancellable calls.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Place a stop order, abort on shutdown.
    pub async fn place_stop(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        stop_price: Price,
        quantity: Quantity,
    ) -> ExecResult<String> {
        self.cancellable(
            "place_stop_order",
            self.exchange.place_stop_order(symbol, side, stop_price, quantity),
        )
        .await
    }

    /// Place a stop order bounded by its deadline only.
    pub async fn place_stop_detached(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        stop_price: Price,
        quantity: Quantity,
    ) -> ExecResult<String> {
        self.bounded(
            "place_stop_order",
            self.exchange.place_stop_order(symbol, side, stop_price, quantity),
        )
        .await
    }

    /// Cancel a resting order, abort on shutdown.
    pub async fn cancel(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()> {
        self.cancellable("cancel_order", self.exchange.cancel_order(symbol, order_id)).await
    }

    /// Cancel a resting order bounded by its deadline only.
    pub async fn cancel_detached(&self, symbol: &Symbol, order_id: &str) -> ExecResult<()> {
        self.bounded("cancel_order", self.exchange.cancel_order(symbol, order_id)).await
    }

    /// Close at market, abort on shutdown.
    pub async fn market_close(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Quantity,
    ) -> ExecResult<Price> {
        self.cancellable(
            "place_market_close",
            self.exchange.place_market_close(symbol, side, quantity),
        )
        .await
    }

    /// Current price, abort on shutdown.
    pub async fn price(&self, symbol: &Symbol) -> ExecResult<Price> {
        self.cancellable("get_price", self.exchange.get_price(symbol)).await
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> ExecResult<T>
    where
        F: Future<Output = ExecResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(format!(
                "{operation} exceeded {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    pub(crate) async fn cancellable<T, F>(&self, operation: &str, call: F) -> ExecResult<T>
    where
        F: Future<Output = ExecResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                Err(ExecError::Cancelled(format!("{operation} abandoned on shutdown")))
            }
            result = self.bounded(operation, call) => result,
        }
    }
}
