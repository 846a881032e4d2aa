//! Currency precision and minor-unit conversion.

use bigdecimal::{BigDecimal, ToPrimitive};

/// ISO codes settled without a fractional part.
pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "CVE", "DJF", "GNF", "IDR", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV", "XAF",
    "XOF", "XPF",
];

/// ISO codes settled with three fractional digits.
pub const THREE_DECIMAL_CURRENCIES: &[&str] = &["BHD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Number of fractional digits for a currency.
pub fn currency_decimals(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Rounds an amount to the currency precision.
pub fn round_to_currency(amount: &BigDecimal, currency: &str) -> BigDecimal {
    let decimals = currency_decimals(currency) as i64;
    amount.round(decimals).with_scale(decimals)
}

/// Converts a major-unit amount to an integer count of minor units.
pub fn to_minor_units(amount: &BigDecimal, currency: &str) -> Option<i64> {
    let factor = BigDecimal::from(10_i64.pow(currency_decimals(currency)));
    (amount * factor).round(0).to_i64()
}

/// Converts an integer count of minor units back to a major-unit amount.
pub fn from_minor_units(minor: i64, currency: &str) -> BigDecimal {
    let decimals = currency_decimals(currency);
    let factor = BigDecimal::from(10_i64.pow(decimals));
    (BigDecimal::from(minor) / factor).with_scale(decimals as i64)
}

/// Fixed-point rendering with exactly `decimals` digits, e.g. `"2947.50"`.
pub fn format_amount(amount: &BigDecimal, decimals: u32) -> String {
    amount.round(decimals as i64).with_scale(decimals as i64).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn test_currency_decimals() {
        assert_eq!(currency_decimals("USD"), 2);
        assert_eq!(currency_decimals("jpy"), 0);
        assert_eq!(currency_decimals("KWD"), 3);
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(&dec("29.47"), "USD"), Some(2947));
        assert_eq!(to_minor_units(&dec("1500"), "JPY"), Some(1500));
        assert_eq!(to_minor_units(&dec("1.234"), "BHD"), Some(1234));
        assert_eq!(from_minor_units(2947, "USD"), dec("29.47"));
        assert_eq!(from_minor_units(1500, "JPY"), dec("1500"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(&dec("2947.5"), 2), "2947.50");
        assert_eq!(format_amount(&dec("10"), 2), "10.00");
    }

    #[test]
    fn test_round_to_currency() {
        assert_eq!(round_to_currency(&dec("29.4700"), "USD"), dec("29.47"));
        assert_eq!(round_to_currency(&dec("1500.00"), "JPY"), dec("1500"));
    }
}
