//! Extracts yen amounts from free page text.

/// Which characters survive before the numeric parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripPolicy {
    /// Digits only. For text holding a single grouped integer, e.g. `4,200 yen`.
    DigitsOnly,
    /// Digits, `.` and `-`. For text that is already free of currency symbols.
    Numeric,
}

impl StripPolicy {
    fn keeps(&self, c: char) -> bool {
        match self {
            StripPolicy::DigitsOnly => c.is_ascii_digit(),
            StripPolicy::Numeric => c.is_ascii_digit() || c == '.' || c == '-',
        }
    }
}

/// Parses the amount in `text`, or `None` when there is no usable number.
///
/// Negative and non-finite results count as no number.
pub fn parse_amount(text: &str, policy: StripPolicy) -> Option<f64> {
    let cleaned: String = text.chars().filter(|&c| policy.keeps(c)).collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = cleaned.parse::<f64>().ok()?;
    if !value.is_finite() || value.is_sign_negative() {
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yen_text_digits_only() {
        assert_eq!(parse_amount("4,200 yen", StripPolicy::DigitsOnly), Some(4200.0));
        assert_eq!(parse_amount("440yen", StripPolicy::DigitsOnly), Some(440.0));
        assert_eq!(parse_amount("1,234,567 YEN", StripPolicy::DigitsOnly), Some(1234567.0));
        assert_eq!(parse_amount("0 yen", StripPolicy::DigitsOnly), Some(0.0));
    }

    #[test]
    fn test_yen_pattern_matches_digit_removal() {
        for text in ["1 yen", "12,000yen", "9,999,999   Yen", "100,000 yen", "5yen"] {
            let expected: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
            assert_eq!(
                parse_amount(text, StripPolicy::DigitsOnly),
                Some(expected.parse::<f64>().unwrap()),
                "{text}"
            );
        }
    }

    #[test]
    fn test_numeric_policy() {
        assert_eq!(parse_amount("12,345", StripPolicy::Numeric), Some(12345.0));
        assert_eq!(parse_amount("1234.5", StripPolicy::Numeric), Some(1234.5));
        assert_eq!(parse_amount("¥ 4,200 yen", StripPolicy::Numeric), Some(4200.0));
    }

    #[test]
    fn test_unparsable_text_is_absent() {
        assert_eq!(parse_amount("Buy it now", StripPolicy::Numeric), None);
        assert_eq!(parse_amount("", StripPolicy::DigitsOnly), None);
        assert_eq!(parse_amount("...", StripPolicy::Numeric), None);
        assert_eq!(parse_amount("1.2.3", StripPolicy::Numeric), None);
        assert_eq!(parse_amount("4-2", StripPolicy::Numeric), None);
    }

    #[test]
    fn test_negative_values_are_absent() {
        assert_eq!(parse_amount("-500", StripPolicy::Numeric), None);
        assert_eq!(parse_amount("-0", StripPolicy::Numeric), None);
        // The sign is stripped under DigitsOnly
        assert_eq!(parse_amount("-500", StripPolicy::DigitsOnly), Some(500.0));
    }

    #[test]
    fn test_huge_digit_runs_are_absent() {
        let text = "9".repeat(400);
        assert_eq!(parse_amount(&text, StripPolicy::DigitsOnly), None);
    }
}
