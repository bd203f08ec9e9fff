//! Risk Parameter Store
//!
//! Immutable symbol → `RiskParameters` lookup, built once at startup and
//! shared by `Arc`. Unknown symbols fall back to the `DEFAULT` entry.

use std::collections::HashMap;
use std::path::Path;

use ratchet_domain::{RiskParameters, Symbol};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Key of the fallback entry in parameter files.
pub const DEFAULT_KEY: &str = "DEFAULT";

/// Per-symbol stop parameters with a default fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParameterStore {
    default: RiskParameters,
    entries: HashMap<String, RiskParameters>,
}

impl RiskParameterStore {
    /// Built-in table: same multipliers everywhere, max distance scaled to
    /// each asset's volatility.
    pub fn builtin() -> Self {
        let entries = [
            ("BTCUSDT", 6),
            ("ETHUSDT", 6),
            ("BNBUSDT", 7),
            ("SOLUSDT", 8),
            ("XRPUSDT", 8),
        ]
        .into_iter()
        .map(|(symbol, max)| {
            (symbol.to_string(), RiskParameters::with_max_distance(Decimal::from(max)))
        })
        .collect();

        Self {
            default: RiskParameters::default(),
            entries,
        }
    }

    /// Build from explicit entries. Keys are normalized.
    ///
    /// # Errors
    /// Returns `EngineError::Domain` if any parameter set is invalid.
    pub fn from_entries<I, K>(default: RiskParameters, entries: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (K, RiskParameters)>,
        K: AsRef<str>,
    {
        default.validate()?;

        let mut map = HashMap::new();
        for (key, params) in entries {
            params.validate()?;
            map.insert(Symbol::normalize(key.as_ref()), params);
        }

        Ok(Self {
            default,
            entries: map,
        })
    }

    /// Parse a JSON object keyed by symbol. Must contain `DEFAULT`.
    ///
    /// ```
    /// # use ratchet_engine::params::RiskParameterStore;
    /// # use rust_decimal_macros::dec;
    /// let json = r#"{
    ///     "DEFAULT": {
    ///         "initial_atr_period": 3, "initial_atr_multiplier": "2.5",
    ///         "trailing_atr_period": 3, "trailing_atr_multiplier": "2.5",
    ///         "update_threshold_pct": "0.3",
    ///         "min_stop_distance_pct": "0.5", "max_stop_distance_pct": "5"
    ///     },
    ///     "btc/usdt": {
    ///         "initial_atr_period": 3, "initial_atr_multiplier": "2",
    ///         "trailing_atr_period": 3, "trailing_atr_multiplier": "2",
    ///         "update_threshold_pct": "0.3",
    ///         "min_stop_distance_pct": "0.5", "max_stop_distance_pct": "6"
    ///     }
    /// }"#;
    ///
    /// let store = RiskParameterStore::from_json_str(json).unwrap();
    /// assert_eq!(store.lookup_str("BTCUSDT").trailing_atr_multiplier, dec!(2));
    /// ```
    ///
    /// # Errors
    /// Returns `EngineError::Json` on malformed input, `EngineError::MissingDefault`
    /// without a `DEFAULT` entry, `EngineError::Domain` for invalid values.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let mut raw: HashMap<String, RiskParameters> = serde_json::from_str(json)?;

        let default_key = raw
            .keys()
            .find(|k| Symbol::normalize(k) == DEFAULT_KEY)
            .cloned()
            .ok_or(EngineError::MissingDefault)?;
        let default = raw.remove(&default_key).ok_or(EngineError::MissingDefault)?;

        Self::from_entries(default, raw)
    }

    /// Load a JSON parameter file.
    ///
    /// # Errors
    /// Returns `EngineError::Io` if the file cannot be read, otherwise as
    /// [`RiskParameterStore::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let store = Self::from_json_str(&contents)?;

        debug!(path = %path.display(), symbols = store.entries.len(), "Loaded risk parameters");
        Ok(store)
    }

    /// Parameters for `symbol`, or `DEFAULT` with a warning.
    pub fn lookup(&self, symbol: &Symbol) -> RiskParameters {
        self.lookup_str(&symbol.as_pair())
    }

    /// Lookup by any accepted spelling of the pair.
    pub fn lookup_str(&self, raw: &str) -> RiskParameters {
        let key = Symbol::normalize(raw);
        match self.entries.get(&key) {
            Some(params) => *params,
            None => {
                warn!(symbol = %key, "No risk parameters for symbol, using DEFAULT");
                self.default
            }
        }
    }

    /// Whether `symbol` has its own entry.
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.contains_key(&symbol.as_pair())
    }

    /// The fallback entry.
    pub fn default_params(&self) -> &RiskParameters {
        &self.default
    }

    /// Symbols with their own entry.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for RiskParameterStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_domain::DomainError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_builtin_max_distances() {
        let store = RiskParameterStore::builtin();

        let cases = [
            ("BTCUSDT", dec!(6)),
            ("ETHUSDT", dec!(6)),
            ("BNBUSDT", dec!(7)),
            ("SOLUSDT", dec!(8)),
            ("XRPUSDT", dec!(8)),
            ("DOGEUSDT", dec!(5)),
        ];

        for (symbol, max) in cases {
            let params = store.lookup_str(symbol);
            assert_eq!(params.max_stop_distance_pct, max, "{symbol}");
            assert_eq!(params.trailing_atr_multiplier, dec!(2.5));
            assert_eq!(params.update_threshold_pct, dec!(0.3));
        }
    }

    #[test]
    fn test_lookup_normalizes_spelling() {
        let store = RiskParameterStore::builtin();

        assert_eq!(store.lookup_str("sol/usdt").max_stop_distance_pct, dec!(8));
        assert_eq!(store.lookup_str("Sol-Usdt").max_stop_distance_pct, dec!(8));
        assert!(store.contains(&Symbol::parse("sol_usdt").unwrap()));
        assert!(!store.contains(&Symbol::parse("DOGEUSDT").unwrap()));
    }

    #[test]
    fn test_json_requires_default() {
        let json = r#"{ "BTCUSDT": {
            "initial_atr_period": 3, "initial_atr_multiplier": "2.5",
            "trailing_atr_period": 3, "trailing_atr_multiplier": "2.5",
            "update_threshold_pct": "0.3",
            "min_stop_distance_pct": "0.5", "max_stop_distance_pct": "6"
        } }"#;

        assert!(matches!(RiskParameterStore::from_json_str(json), Err(EngineError::MissingDefault)));
    }

    #[test]
    fn test_json_rejects_invalid_entry() {
        let json = r#"{ "DEFAULT": {
            "initial_atr_period": 0, "initial_atr_multiplier": "2.5",
            "trailing_atr_period": 3, "trailing_atr_multiplier": "2.5",
            "update_threshold_pct": "0.3",
            "min_stop_distance_pct": "0.5", "max_stop_distance_pct": "6"
        } }"#;

        assert!(matches!(
            RiskParameterStore::from_json_str(json),
            Err(EngineError::Domain(DomainError::InvalidRiskParameters(_)))
        ));
    }

    #[test]
    fn test_from_json_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("ratchet-params-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "default": {
                "initial_atr_period": 14, "initial_atr_multiplier": "3",
                "trailing_atr_period": 14, "trailing_atr_multiplier": "2",
                "update_threshold_pct": "0.5",
                "min_stop_distance_pct": "1", "max_stop_distance_pct": "10"
            } }"#,
        )?;

        let store = RiskParameterStore::from_json_file(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(store.default_params().initial_atr_period, 14);
        assert_eq!(store.lookup_str("ANYUSDT").max_stop_distance_pct, dec!(10));
        assert_eq!(store.symbols().count(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = RiskParameterStore::from_json_file("/nonexistent/ratchet/params.json");
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
