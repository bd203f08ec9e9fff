//! Value Objects for the Ratchet Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Symbol must be valid trading pair
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Side string was neither "long" nor "short"
    #[error("Invalid side: {0}")]
    InvalidSide(String),

    /// RiskParameters validation error
    #[error("Invalid risk parameters: {0}")]
    InvalidRiskParameters(String),

    /// Take-profit ladder validation error
    #[error("Invalid take-profit ladder: {0}")]
    InvalidLadder(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(format!("Price must be positive, got {value}")));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity represents a non-negative decimal quantity
///
/// # Invariants
/// - Must be > 0 when constructed through `new`
/// - `zero()` only marks a fully closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity(format!(
                "Quantity must be positive, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Create a zero quantity (closed positions only)
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Whether nothing is left
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract `other`, flooring at zero.
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        Self((self.0 - other.0).max(Decimal::ZERO))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Symbol represents a trading pair (e.g., BTCUSDT)
///
/// # Invariants
/// - Stored normalized: upper-case, no separators
/// - Base and quote must be non-empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Common quote currencies, longest match wins.
    const QUOTE_CURRENCIES: &'static [&'static str] = &["USDT", "USDC", "BUSD", "BTC", "ETH", "BNB"];

    /// Normalize a raw symbol string into its lookup key.
    ///
    /// Case-insensitive, strips `/`, `-`, `_` and whitespace.
    ///
    /// ```
    /// # use ratchet_domain::value_objects::Symbol;
    /// assert_eq!(Symbol::normalize("btc/usdt"), "BTCUSDT");
    /// assert_eq!(Symbol::normalize(" ETH-USDT "), "ETHUSDT");
    /// ```
    pub fn normalize(raw: &str) -> String {
        raw.chars()
            .filter(|c| !matches!(c, '/' | '-' | '_') && !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect()
    }

    /// Parse any accepted spelling of a trading pair.
    ///
    /// # Examples
    /// ```
    /// # use ratchet_domain::value_objects::Symbol;
    /// let symbol = Symbol::parse("BTC/USDT").unwrap();
    /// assert_eq!(symbol.base(), "BTC");
    /// assert_eq!(symbol.quote(), "USDT");
    /// assert_eq!(symbol, Symbol::parse("btcusdt").unwrap());
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if no known quote currency matches
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        Self::from_pair(&Self::normalize(raw))
    }

    /// Create a Symbol from an already normalized trading pair string
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if format is invalid
    pub fn from_pair(pair: &str) -> Result<Self, DomainError> {
        for quote in Self::QUOTE_CURRENCIES {
            if let Some(base) = pair.strip_suffix(quote) {
                if !base.is_empty() {
                    return Ok(Self {
                        base: base.to_string(),
                        quote: quote.to_string(),
                    });
                }
            }
        }

        Err(DomainError::InvalidSymbol(format!("Cannot parse trading pair: {}", pair)))
    }

    /// Get the base currency
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get the quote currency
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Get the trading pair as string (e.g., "BTCUSDT")
    pub fn as_pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_pair())
    }
}

impl FromStr for Symbol {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Side
// =============================================================================

/// Side represents the position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Long position (buy low, sell high)
    Long,
    /// Short position (sell high, buy low)
    Short,
}

impl Side {
    /// Get the exit action for this side
    ///
    /// Long → Sell, Short → Buy
    pub fn exit_action(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// +1 for long, -1 for short. Multiplies distances into price offsets.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Whether `candidate` is strictly better than `reference` for this side.
    ///
    /// Higher is better for longs, lower for shorts. Ties are not better.
    pub fn is_better(&self, candidate: Decimal, reference: Decimal) -> bool {
        match self {
            Side::Long => candidate > reference,
            Side::Short => candidate < reference,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(DomainError::InvalidSide(other.to_string())),
        }
    }
}

/// OrderSide represents the order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
