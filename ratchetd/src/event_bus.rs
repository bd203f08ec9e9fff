//! Event bus for risk decisions.
//!
//! Every stop placement, replacement, rung execution and exit is published
//! here so dashboards and persistence collaborators can follow along
//! without coupling to the controller.
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use ratchet_domain::{PositionId, Price, Quantity, Side, StopSource, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

// =============================================================================
// Event Types
// =============================================================================

/// Events published by the risk core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskEvent {
    /// Position entered the registry
    PositionRegistered {
        position_id: PositionId,
        symbol: Symbol,
        side: Side,
        entry_price: Price,
        initial_stop: Price,
        timestamp: DateTime<Utc>,
    },

    /// Initial stop order rests at the venue
    StopPlaced {
        symbol: Symbol,
        stop: Price,
        order_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Stop replaced with a tighter one
    StopUpdated {
        symbol: Symbol,
        old_stop: Price,
        new_stop: Price,
        reason: String,
        source: StopSource,
        timestamp: DateTime<Utc>,
    },

    /// Favorable change recorded but below the update threshold
    StopUpdateDeferred {
        symbol: Symbol,
        current_stop: Price,
        computed_stop: Price,
        change_pct: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// A take-profit rung filled
    TakeProfitExecuted {
        symbol: Symbol,
        level: u32,
        fill_price: Price,
        quantity: Quantity,
        realized_pnl: Decimal,
        remaining: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Price breached the stop
    StopTriggered {
        symbol: Symbol,
        stop: Price,
        price: Price,
        timestamp: DateTime<Utc>,
    },

    /// Position fully closed and removed
    PositionClosed {
        symbol: Symbol,
        fill_price: Price,
        realized_pnl: Decimal,
        timestamp: DateTime<Utc>,
    },

    /// Position is open with no resting stop order
    ProtectionLost {
        symbol: Symbol,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl RiskEvent {
    /// Symbol the event concerns.
    pub fn symbol(&self) -> &Symbol {
        match self {
            RiskEvent::PositionRegistered { symbol, .. }
            | RiskEvent::StopPlaced { symbol, .. }
            | RiskEvent::StopUpdated { symbol, .. }
            | RiskEvent::StopUpdateDeferred { symbol, .. }
            | RiskEvent::TakeProfitExecuted { symbol, .. }
            | RiskEvent::StopTriggered { symbol, .. }
            | RiskEvent::PositionClosed { symbol, .. }
            | RiskEvent::ProtectionLost { symbol, .. } => symbol,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Fan-out of risk events to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<RiskEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber, returns how many got it.
    pub fn send(&self, event: RiskEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Live subscriptions.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Events dropped by a receiver that fell behind the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("receiver lagged, missed {0} events")]
pub struct Lagged(pub u64);

/// Subscription to risk events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<RiskEvent>,
}

impl EventReceiver {
    /// Next event, waiting for one.
    ///
    /// `None` once the bus is gone; `Some(Err)` reports a gap before the
    /// next event.
    pub async fn recv(&mut self) -> Option<Result<RiskEvent, Lagged>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(RecvError::Lagged(missed)) => Some(Err(Lagged(missed))),
            Err(RecvError::Closed) => None,
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<RiskEvent, Lagged>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(TryRecvError::Lagged(missed)) => Some(Err(Lagged(missed))),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        while let Some(next) = self.try_recv() {
            if let Ok(event) = next {
                events.push(event);
            }
        }
        events
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stop_placed() -> RiskEvent {
        RiskEvent::StopPlaced {
            symbol: Symbol::from_pair("BTCUSDT").unwrap(),
            stop: Price::new(dec!(48750)).unwrap(),
            order_id: "STUB-1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_send_recv() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(stop_placed());

        let event = receiver.recv().await.unwrap().unwrap();
        match event {
            RiskEvent::StopPlaced { order_id, .. } => assert_eq!(order_id, "STUB-1"),
            _ => panic!("Expected StopPlaced event"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_receivers() {
        let bus = EventBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        assert_eq!(bus.receiver_count(), 2);
        assert_eq!(bus.send(stop_placed()), 2);

        assert!(matches!(receiver1.recv().await, Some(Ok(RiskEvent::StopPlaced { .. }))));
        assert!(matches!(receiver2.recv().await, Some(Ok(RiskEvent::StopPlaced { .. }))));
    }

    #[test]
    fn test_event_bus_no_receivers() {
        let bus = EventBus::new(10);

        assert_eq!(bus.send(stop_placed()), 0);
    }

    #[test]
    fn test_lagged_receiver_reports_gap() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for _ in 0..3 {
            bus.send(stop_placed());
        }

        assert_eq!(receiver.try_recv().unwrap().unwrap_err(), Lagged(1));
        assert_eq!(receiver.drain().len(), 2);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(stop_placed()).unwrap();

        assert_eq!(json["type"], "stop_placed");
        assert_eq!(json["symbol"]["base"], "BTC");
        assert_eq!(stop_placed().symbol().as_pair(), "BTCUSDT");
    }
}
