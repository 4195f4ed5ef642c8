use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Currencies the processor charges without a fractional minor unit.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Number of decimal places between the minor and major unit.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let lower = currency.to_ascii_lowercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&lower.as_str()) {
        0
    } else {
        2
    }
}

/// Converts a processor amount (minor units) to major units without rounding.
pub fn minor_to_major(amount_minor: i64, currency: &str) -> Decimal {
    Decimal::new(amount_minor, minor_unit_exponent(currency))
}

/// Converts a major-unit amount to minor units, rounding half away from zero.
/// Returns `None` when the result does not fit in an `i64`.
pub fn major_to_minor(amount: Decimal, currency: &str) -> Option<i64> {
    let scale = Decimal::from(10_i64.pow(minor_unit_exponent(currency)));
    amount
        .checked_mul(scale)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(4999, "usd", dec!(49.99))]
    #[case(4999, "USD", dec!(49.99))]
    #[case(100, "eur", dec!(1.00))]
    #[case(1, "usd", dec!(0.01))]
    #[case(4999, "jpy", dec!(4999))]
    #[case(0, "usd", dec!(0))]
    fn converts_minor_to_major(#[case] minor: i64, #[case] currency: &str, #[case] expected: Decimal) {
        assert_eq!(minor_to_major(minor, currency), expected);
    }

    #[rstest]
    #[case(dec!(49.99), "usd", 4999)]
    #[case(dec!(10.005), "usd", 1001)]
    #[case(dec!(10.004), "usd", 1000)]
    #[case(dec!(1500), "jpy", 1500)]
    fn converts_major_to_minor(#[case] major: Decimal, #[case] currency: &str, #[case] expected: i64) {
        assert_eq!(major_to_minor(major, currency), Some(expected));
    }

    #[test]
    fn overflow_yields_none() {
        assert_eq!(major_to_minor(Decimal::MAX, "usd"), None);
    }
}
