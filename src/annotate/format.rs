//! Display formatting for converted amounts.

use crate::core::Currency;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Symbol for a currency code; unknown codes stand in for their own symbol.
pub fn symbol_for(code: &str) -> &str {
    match code.parse::<Currency>() {
        Ok(currency) => currency.symbol(),
        Err(_) => code,
    }
}

/// `<symbol><amount>` with two fraction digits and `,` thousands separators,
/// e.g. `$1,234.50`.
pub fn format_currency(amount: f64, code: &str) -> String {
    format!("{}{}", symbol_for(code), format_amount(amount))
}

/// Two fraction digits, rounded half away from zero, with grouped thousands.
pub fn format_amount(amount: f64) -> String {
    let Some(cents) = rounded_cents(amount) else {
        // Outside what Decimal can hold; plain float formatting is close enough
        let plain = format!("{amount:.2}");
        return match plain.split_once('.') {
            Some((whole, fraction)) => format!("{}.{}", group_thousands(whole), fraction),
            None => plain,
        };
    };

    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let whole = (cents / 100).to_string();
    format!("{sign}{}.{:02}", group_thousands(&whole), cents % 100)
}

// Rounds the shortest decimal form of `amount`, so 1.005 becomes 1.01 the
// way a person reading the number would expect.
fn rounded_cents(amount: f64) -> Option<i128> {
    if !amount.is_finite() {
        return None;
    }
    let decimal = Decimal::from_str(&amount.to_string()).ok()?;
    decimal
        .checked_mul(Decimal::from(100))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i128()
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_currency_symbols() {
        assert_eq!(format_currency(28.14, "USD"), "$28.14");
        assert_eq!(format_currency(26.04, "EUR"), "€26.04");
        assert_eq!(format_currency(3.5, "GBP"), "GBP3.50");
    }

    #[test]
    fn test_converted_listing_amounts() {
        assert_eq!(format_currency(4200.0 * 0.0067, "USD"), "$28.14");
        assert_eq!(format_currency(4200.0 * 0.0062, "EUR"), "€26.04");
        assert_eq!(format_currency(440.0 * 0.0067, "USD"), "$2.95");
    }

    #[test]
    fn test_two_fraction_digits_and_grouping() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(7.0), "7.00");
        assert_eq!(format_amount(999.999), "1,000.00");
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
        assert_eq!(format_amount(100000.0), "100,000.00");
    }

    #[test]
    fn test_half_rounds_away_from_zero() {
        assert_eq!(format_amount(1.005), "1.01");
        assert_eq!(format_amount(2.675), "2.68");
        assert_eq!(format_amount(0.125), "0.13");
        assert_eq!(format_amount(0.124), "0.12");
    }

    #[test]
    fn test_amounts_beyond_decimal_range() {
        assert_eq!(
            format_amount(2f64.powi(100)),
            "1,267,650,600,228,229,401,496,703,205,376.00"
        );
    }
}
