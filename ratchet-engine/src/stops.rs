//! Stop Calculator (Pure Functions)
//!
//! ATR-scaled stop prices and the validation rules applied to every
//! proposed stop. All functions are deterministic and side-effect free.
//!
//! # Formulas
//!
//! ```text
//! initial  LONG:  entry   - initial_multiplier  × ATR
//!          SHORT: entry   + initial_multiplier  × ATR
//! trailing LONG:  highest - trailing_multiplier × ATR
//!          SHORT: lowest  + trailing_multiplier × ATR
//! ```
//!
//! Key invariants:
//! - A stop only ever moves in the favorable direction (strictly)
//! - Exactly the update threshold counts as exceeding it
//! - Both ends of the distance band are valid
//!
//! # Preconditions
//!
//! Reference prices are `Price` values and therefore strictly positive, so
//! the percentage formulas never divide by zero. ATR is taken as given; an
//! ATR of zero yields a stop equal to the reference price.

use ratchet_domain::{Price, RiskParameters, Side};
use rust_decimal::Decimal;

/// Initial stop from the entry price.
///
/// Returns the raw decimal; a long stop can come out non-positive for an
/// ATR larger than the entry, which the caller must reject.
///
/// # Examples
///
/// ```
/// # use ratchet_domain::{Price, RiskParameters, Side};
/// # use ratchet_engine::stops::initial_stop;
/// # use rust_decimal_macros::dec;
/// let params = RiskParameters::default(); // multiplier 2.5
/// let entry = Price::new(dec!(50000)).unwrap();
///
/// assert_eq!(initial_stop(entry, dec!(500), Side::Long, &params), dec!(48750));
/// assert_eq!(initial_stop(entry, dec!(500), Side::Short, &params), dec!(51250));
/// ```
pub fn initial_stop(entry_price: Price, atr: Decimal, side: Side, params: &RiskParameters) -> Decimal {
    offset_against(side, entry_price, params.initial_atr_multiplier * atr)
}

/// Trailing stop from the favorable extreme (highest for long, lowest for short).
///
/// # Examples
///
/// ```
/// # use ratchet_domain::{Price, RiskParameters, Side};
/// # use ratchet_engine::stops::trailing_stop;
/// # use rust_decimal_macros::dec;
/// let params = RiskParameters::default();
///
/// let high = Price::new(dec!(52000)).unwrap();
/// assert_eq!(trailing_stop(high, dec!(500), Side::Long, &params), dec!(50750));
///
/// let low = Price::new(dec!(48000)).unwrap();
/// assert_eq!(trailing_stop(low, dec!(500), Side::Short, &params), dec!(49250));
/// ```
pub fn trailing_stop(
    extreme_price: Price,
    atr: Decimal,
    side: Side,
    params: &RiskParameters,
) -> Decimal {
    offset_against(side, extreme_price, params.trailing_atr_multiplier * atr)
}

fn offset_against(side: Side, reference: Price, distance: Decimal) -> Decimal {
    reference.as_decimal() - side.sign() * distance
}

/// Whether moving the stop from `old_stop` to `new_stop` tightens it.
///
/// Long requires `new > old`, short requires `new < old`. Equal is not a move.
///
/// ```
/// # use ratchet_domain::{Price, Side};
/// # use ratchet_engine::stops::is_favorable_move;
/// # use rust_decimal_macros::dec;
/// let old = Price::new(dec!(50750)).unwrap();
/// let up = Price::new(dec!(51750)).unwrap();
///
/// assert!(is_favorable_move(Side::Long, old, up));
/// assert!(!is_favorable_move(Side::Long, up, old));
/// assert!(!is_favorable_move(Side::Long, old, old));
/// assert!(is_favorable_move(Side::Short, up, old));
/// ```
pub fn is_favorable_move(side: Side, old_stop: Price, new_stop: Price) -> bool {
    side.is_better(new_stop.as_decimal(), old_stop.as_decimal())
}

/// Absolute change between two stops, in percent of the old one.
pub fn change_pct(old_stop: Price, new_stop: Price) -> Decimal {
    let old = old_stop.as_decimal();
    (new_stop.as_decimal() - old).abs() / old * Decimal::ONE_HUNDRED
}

/// Whether the change is large enough to replace the resting order.
///
/// `|new - old| / |old| × 100 >= update_threshold_pct`
///
/// ```
/// # use ratchet_domain::{Price, RiskParameters};
/// # use ratchet_engine::stops::exceeds_update_threshold;
/// # use rust_decimal_macros::dec;
/// let params = RiskParameters::default(); // 0.3 %
/// let old = Price::new(dec!(10000)).unwrap();
///
/// assert!(exceeds_update_threshold(old, Price::new(dec!(10030)).unwrap(), &params));
/// assert!(!exceeds_update_threshold(old, Price::new(dec!(10029)).unwrap(), &params));
/// ```
pub fn exceeds_update_threshold(old_stop: Price, new_stop: Price, params: &RiskParameters) -> bool {
    change_pct(old_stop, new_stop) >= params.update_threshold_pct
}

/// Distance between reference and stop in percent of the reference.
///
/// Positive while the stop sits on the losing side of the reference.
pub fn stop_distance_pct(reference_price: Price, stop_price: Price, side: Side) -> Decimal {
    let reference = reference_price.as_decimal();
    (reference - stop_price.as_decimal()) * side.sign() / reference * Decimal::ONE_HUNDRED
}

/// Whether the stop distance lies in `[min_stop_distance_pct, max_stop_distance_pct]`.
///
/// ```
/// # use ratchet_domain::{Price, RiskParameters, Side};
/// # use ratchet_engine::stops::is_distance_within_range;
/// # use rust_decimal_macros::dec;
/// let params = RiskParameters::default(); // [0.5, 5]
/// let reference = Price::new(dec!(1000)).unwrap();
///
/// assert!(is_distance_within_range(reference, Price::new(dec!(995)).unwrap(), Side::Long, &params));
/// assert!(is_distance_within_range(reference, Price::new(dec!(950)).unwrap(), Side::Long, &params));
/// assert!(!is_distance_within_range(reference, Price::new(dec!(949)).unwrap(), Side::Long, &params));
/// assert!(!is_distance_within_range(reference, Price::new(dec!(996)).unwrap(), Side::Long, &params));
/// ```
pub fn is_distance_within_range(
    reference_price: Price,
    stop_price: Price,
    side: Side,
    params: &RiskParameters,
) -> bool {
    let distance = stop_distance_pct(reference_price, stop_price, side);
    distance >= params.min_stop_distance_pct && distance <= params.max_stop_distance_pct
}

/// Raise (long) or lower (short) a proposed stop to the take-profit floor.
///
/// ```
/// # use ratchet_domain::{Price, Side};
/// # use ratchet_engine::stops::clamp_to_floor;
/// # use rust_decimal_macros::dec;
/// let floor = Price::new(dec!(50000)).unwrap();
/// let proposed = Price::new(dec!(49800)).unwrap();
///
/// assert_eq!(clamp_to_floor(Side::Long, proposed, Some(floor)), floor);
/// assert_eq!(clamp_to_floor(Side::Short, proposed, Some(floor)), proposed);
/// assert_eq!(clamp_to_floor(Side::Long, proposed, None), proposed);
/// ```
pub fn clamp_to_floor(side: Side, proposed: Price, floor: Option<Price>) -> Price {
    match (side, floor) {
        (_, None) => proposed,
        (Side::Long, Some(floor)) => proposed.max(floor),
        (Side::Short, Some(floor)) => proposed.min(floor),
    }
}

/// Whether the floor would change the proposal.
pub fn violates_floor(side: Side, proposed: Price, floor: Option<Price>) -> bool {
    clamp_to_floor(side, proposed, floor) != proposed
}

// =============================================================================
// Tests
// =============================================================================
