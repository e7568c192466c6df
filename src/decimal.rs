//! Fixed-point helpers shared by every pricing path. Floating point never
//! touches a value on its way to an exchange: everything here operates on
//! `rust_decimal::Decimal` and rounds half-up (`MidpointAwayFromZero`).

use rust_decimal::{Decimal, RoundingStrategy};

/// Quantises `value` to `decimals` fractional digits, rounding half-up.
pub fn quantize(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Quantises a price using the grid's configured price precision.
pub fn quantize_price(value: Decimal, price_decimals: u32) -> Decimal {
    quantize(value, price_decimals)
}

/// Quantises a quantity using the grid's configured quantity precision.
pub fn quantize_qty(value: Decimal, quantity_precision: u32) -> Decimal {
    quantize(value, quantity_precision)
}

/// Rounds a ratio to the nearest integer, half-up, away from zero.
/// Used for price -> grid index mapping, which must round rather than
/// truncate to absorb conversion noise at the boundary between two levels.
pub fn round_to_i64(value: Decimal) -> i64 {
    quantize(value, 0).to_string().parse::<i64>().unwrap_or_else(|_| {
        // Decimal::round_dp_with_strategy always yields an integral value at
        // dp=0; the only failure mode is an out-of-i64-range grid, which is
        // a configuration error rather than a runtime one.
        if value.is_sign_negative() { i64::MIN } else { i64::MAX }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn half_up_rounds_away_from_zero_at_midpoint() {
        assert_eq!(quantize(dec!(0.0015), 3), dec!(0.002));
        assert_eq!(quantize(dec!(0.0005), 3), dec!(0.001));
    }

    #[test]
    fn quantize_is_idempotent() {
        let v = quantize(dec!(110015.69733), 1);
        assert_eq!(v, dec!(110015.7));
        assert_eq!(quantize(v, 1), v);
    }

    #[test]
    fn round_to_i64_rounds_not_truncates() {
        assert_eq!(round_to_i64(dec!(2.5)), 3);
        assert_eq!(round_to_i64(dec!(2.49)), 2);
        assert_eq!(round_to_i64(dec!(-2.5)), -3);
    }
}
