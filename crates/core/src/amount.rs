//! Decimal base-unit amount parsing and validation (§3 `QueuedTx.amount`,
//! §8 boundary behaviors). Literal rejects mirror the source's observed
//! behavior: `"NaN"`, `"undefined"`, `"null"`, empty, zero, and negative.

use rust_decimal::Decimal;
use std::str::FromStr;

const REJECTED_LITERALS: &[&str] = &["nan", "undefined", "null", ""];

/// Parse `raw` as a positive decimal with at most `max_decimals` fractional
/// digits. Returns the normalized [`Decimal`] on success.
pub fn parse_amount(raw: &str, max_decimals: u32) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    if REJECTED_LITERALS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Err(format!("amount '{raw}' is not a valid decimal"));
    }

    let value = Decimal::from_str(trimmed).map_err(|_| format!("amount '{raw}' is not a valid decimal"))?;

    if value.is_sign_negative() || value.is_zero() {
        return Err("amount must be a positive decimal".to_string());
    }
    if value.scale() > max_decimals {
        return Err(format!(
            "amount '{raw}' has more than {max_decimals} fractional digits"
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_zero_and_negative() {
        assert!(parse_amount("0", 18).is_err());
        assert!(parse_amount("-1", 18).is_err());
    }

    #[test]
    fn rejects_known_bad_literals() {
        for literal in ["NaN", "undefined", "null", ""] {
            assert!(parse_amount(literal, 18).is_err(), "{literal} should be rejected");
        }
    }

    #[test]
    fn rejects_too_many_fractional_digits() {
        assert!(parse_amount("1.1234567890123456789", 18).is_err());
    }

    #[test]
    fn accepts_valid_positive_decimal() {
        assert_eq!(parse_amount("12.5", 18).unwrap(), Decimal::from_str("12.5").unwrap());
    }

    proptest! {
        #[test]
        fn any_positive_integer_string_parses(n in 1u64..1_000_000_000) {
            let amount = parse_amount(&n.to_string(), 18).unwrap();
            prop_assert_eq!(amount, Decimal::from(n));
        }
    }
}
