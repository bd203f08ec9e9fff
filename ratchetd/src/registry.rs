//! Position Registry: the single source of truth for open positions.
//!
//! # Locking
//!
//! ```text
//! registry  RwLock<HashMap<Symbol, Handle>>   membership only
//! handle    Arc<Mutex<Position>>              one per position, held
//!                                             across gateway calls
//! ```
//!
//! Lock order is position → registry. The registry lock is never held
//! while waiting on a position lock, so a slow order replacement on one
//! symbol never blocks registration or lookups for others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use ratchet_domain::{Position, Symbol};

/// Shared, individually locked position.
pub type PositionHandle = Arc<Mutex<Position>>;

/// Concurrency-safe store of open positions keyed by symbol.
#[derive(Default)]
pub struct PositionRegistry {
    positions: RwLock<HashMap<Symbol, PositionHandle>>,
}

impl PositionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a position, replacing any prior entry for the symbol.
    ///
    /// Current and extreme prices are seeded from the entry price. A
    /// replaced position is marked closed so in-flight holders of its
    /// handle stop acting on it.
    pub async fn register(&self, mut position: Position) -> PositionHandle {
        position.seed_from_entry();
        let symbol = position.symbol.clone();
        let handle = Arc::new(Mutex::new(position));

        let replaced = {
            let mut positions = self.positions.write().await;
            positions.insert(symbol.clone(), Arc::clone(&handle))
        };

        if let Some(old) = replaced {
            let mut old = old.lock().await;
            warn!(
                %symbol,
                old_position_id = %old.id,
                orphaned_order = ?old.stop_order_id,
                "Replaced existing position registration"
            );
            old.close();
        }

        debug!(%symbol, "Position registered");
        handle
    }

    /// Remove a position. Idempotent.
    pub async fn remove(&self, symbol: &Symbol) -> Option<PositionHandle> {
        self.positions.write().await.remove(symbol)
    }

    /// Remove `symbol` only if it still maps to `handle`.
    ///
    /// Used after closing a position so that a registration that replaced it
    /// in the meantime survives.
    pub async fn remove_if_same(&self, symbol: &Symbol, handle: &PositionHandle) -> bool {
        let mut positions = self.positions.write().await;
        match positions.get(symbol) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                positions.remove(symbol);
                true
            },
            _ => false,
        }
    }

    /// Handle for `symbol`, if registered.
    pub async fn handle(&self, symbol: &Symbol) -> Option<PositionHandle> {
        self.positions.read().await.get(symbol).cloned()
    }

    /// Copy of the position for `symbol`.
    ///
    /// Waits for any in-flight mutation of that position to finish.
    pub async fn get(&self, symbol: &Symbol) -> Option<Position> {
        let handle = self.handle(symbol).await?;
        let position = handle.lock().await;
        position.is_open().then(|| position.clone())
    }

    /// Snapshot of the handle set, sorted by symbol.
    pub async fn handles(&self) -> Vec<(Symbol, PositionHandle)> {
        let positions = self.positions.read().await;
        let mut handles: Vec<_> =
            positions.iter().map(|(s, h)| (s.clone(), Arc::clone(h))).collect();
        handles.sort_by_key(|(symbol, _)| symbol.as_pair());
        handles
    }

    /// Copies of every open position, each taken between mutations.
    pub async fn get_all(&self) -> Vec<Position> {
        let mut snapshot = Vec::new();
        for (_, handle) in self.handles().await {
            let position = handle.lock().await;
            if position.is_open() {
                snapshot.push(position.clone());
            }
        }
        snapshot
    }

    /// Registered symbols.
    pub async fn symbols(&self) -> Vec<Symbol> {
        self.handles().await.into_iter().map(|(symbol, _)| symbol).collect()
    }

    /// Number of registered positions.
    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    /// Whether nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_domain::{Price, Quantity, Side, StopState};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, entry: Decimal) -> Position {
        Position::new(
            Symbol::parse(symbol).unwrap(),
            Side::Long,
            Price::new(entry).unwrap(),
            Quantity::new(dec!(1)).unwrap(),
            Price::new(entry * dec!(0.95)).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_seeds_prices() {
        let registry = PositionRegistry::new();
        let mut pos = position("BTCUSDT", dec!(50000));
        pos.current_price = Price::new(dec!(1)).unwrap();

        registry.register(pos).await;

        let stored = registry.get(&Symbol::parse("BTC/USDT").unwrap()).await.unwrap();
        assert_eq!(stored.current_price.as_decimal(), dec!(50000));
        assert_eq!(stored.extreme_price.as_decimal(), dec!(50000));
    }

    #[tokio::test]
    async fn test_register_overwrites_and_closes_old() {
        let registry = PositionRegistry::new();
        let first = registry.register(position("BTCUSDT", dec!(50000))).await;
        registry.register(position("BTCUSDT", dec!(60000))).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(first.lock().await.state, StopState::Closed);

        let symbol = Symbol::parse("BTCUSDT").unwrap();
        assert_eq!(registry.get(&symbol).await.unwrap().entry_price.as_decimal(), dec!(60000));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = PositionRegistry::new();
        let symbol = Symbol::parse("ETHUSDT").unwrap();
        registry.register(position("ETHUSDT", dec!(3000))).await;

        assert!(registry.remove(&symbol).await.is_some());
        assert!(registry.remove(&symbol).await.is_none());
        assert!(registry.get(&symbol).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_if_same_ignores_replacement() {
        let registry = PositionRegistry::new();
        let symbol = Symbol::parse("BTCUSDT").unwrap();

        let stale = registry.register(position("BTCUSDT", dec!(50000))).await;
        let fresh = registry.register(position("BTCUSDT", dec!(51000))).await;

        assert!(!registry.remove_if_same(&symbol, &stale).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove_if_same(&symbol, &fresh).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_all_is_a_snapshot() {
        let registry = PositionRegistry::new();
        registry.register(position("ETHUSDT", dec!(3000))).await;
        registry.register(position("BTCUSDT", dec!(50000))).await;

        let snapshot = registry.get_all().await;
        registry.remove(&Symbol::parse("BTCUSDT").unwrap()).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].symbol.as_pair(), "BTCUSDT");
        assert_eq!(registry.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(PositionRegistry::new());

        let tasks: Vec<_> = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT"]
            .into_iter()
            .map(|symbol| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.register(position(symbol, dec!(100))).await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len().await, 5);
        assert_eq!(registry.symbols().await.len(), 5);
    }
}
