//! Trailing Stop Decision
//!
//! Turns a fresh ATR reading into a proposal for the controller. The
//! proposal is already clamped to the take-profit floor; the controller
//! still applies its own monotonicity and threshold gates.

use ratchet_domain::{Price, RiskParameters, Side};
use rust_decimal::Decimal;

use crate::stops::{clamp_to_floor, is_favorable_move, stop_distance_pct, trailing_stop};

/// Snapshot of the position fields the decision needs.
#[derive(Debug, Clone, Copy)]
pub struct TrailingInput {
    /// Position side
    pub side: Side,
    /// Best price since entry
    pub favorable_extreme: Price,
    /// Last market price
    pub current_price: Price,
    /// Committed stop
    pub current_stop: Price,
    /// Take-profit floor, if a rung has fired
    pub floor: Option<Price>,
}

/// Outcome of a trailing recalculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingDecision {
    /// Candidate does not tighten the committed stop
    Hold {
        /// Raw candidate after the floor clamp
        candidate: Decimal,
    },
    /// Candidate is closer to the market than the minimum distance
    TooTight {
        /// Clamped candidate
        candidate: Price,
        /// Distance from the current price, percent
        distance_pct: Decimal,
    },
    /// Candidate should be submitted as an update
    Propose {
        /// Stop to submit
        stop: Price,
        /// Distance from the current price, percent
        distance_pct: Decimal,
        /// The floor replaced the raw trailing value
        clamped: bool,
        /// Distance exceeds the configured maximum
        wide: bool,
    },
}

/// Decide whether a trailing recalculation should move the stop.
///
/// # Examples
///
/// ```
/// # use ratchet_domain::{Price, RiskParameters, Side};
/// # use ratchet_engine::trailing::{decide_trailing, TrailingDecision, TrailingInput};
/// # use rust_decimal_macros::dec;
/// let input = TrailingInput {
///     side: Side::Long,
///     favorable_extreme: Price::new(dec!(52000)).unwrap(),
///     current_price: Price::new(dec!(52000)).unwrap(),
///     current_stop: Price::new(dec!(48750)).unwrap(),
///     floor: None,
/// };
///
/// match decide_trailing(&input, dec!(500), &RiskParameters::default()) {
///     TrailingDecision::Propose { stop, clamped, .. } => {
///         assert_eq!(stop.as_decimal(), dec!(50750));
///         assert!(!clamped);
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn decide_trailing(input: &TrailingInput, atr: Decimal, params: &RiskParameters) -> TrailingDecision {
    let raw = trailing_stop(input.favorable_extreme, atr, input.side, params);

    // A non-positive long candidate can only be lifted by a floor.
    let candidate = match (Price::new(raw), input.floor) {
        (Ok(price), floor) => clamp_to_floor(input.side, price, floor),
        (Err(_), Some(floor)) if input.side == Side::Long => floor,
        (Err(_), _) => return TrailingDecision::Hold { candidate: raw },
    };
    let clamped = candidate.as_decimal() != raw;

    if !is_favorable_move(input.side, input.current_stop, candidate) {
        return TrailingDecision::Hold {
            candidate: candidate.as_decimal(),
        };
    }

    let distance_pct = stop_distance_pct(input.current_price, candidate, input.side);
    if distance_pct < params.min_stop_distance_pct {
        return TrailingDecision::TooTight {
            candidate,
            distance_pct,
        };
    }

    TrailingDecision::Propose {
        stop: candidate,
        distance_pct,
        clamped,
        wide: distance_pct > params.max_stop_distance_pct,
    }
}
