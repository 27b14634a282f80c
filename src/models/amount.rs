//! Monetary amounts at the API boundary
//!
//! Callers send major units (naira) as a JSON number or numeric string; the
//! ledger stores minor units (kobo) as `i64`. Anything non-numeric,
//! non-positive or finer than two decimal places is rejected here, before
//! any transaction or balance is touched.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::error::AppError;

const MINOR_UNIT_SCALE: u32 = 2;

/// Parse a major-unit amount into minor units.
pub fn parse_amount(value: &JsonValue) -> Result<i64, AppError> {
    let raw = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Null => return Err(AppError::validation("amount is required")),
        _ => return Err(AppError::validation("amount must be a number")),
    };

    let decimal = Decimal::from_str_exact(&raw)
        .map_err(|_| AppError::validation(format!("amount '{}' is not a valid number", raw)))?
        .normalize();

    if decimal.is_zero() || decimal.is_sign_negative() {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    if decimal.scale() > MINOR_UNIT_SCALE {
        return Err(AppError::validation(
            "amount must have at most 2 decimal places",
        ));
    }

    decimal
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| AppError::validation("amount is too large"))
}

/// Render minor units as a two-decimal major-unit string.
pub fn format_minor(minor: i64) -> String {
    Decimal::new(minor, MINOR_UNIT_SCALE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_amount(&json!(5000)).unwrap(), 500_000);
        assert_eq!(parse_amount(&json!(50.25)).unwrap(), 5_025);
        assert_eq!(parse_amount(&json!("1200.5")).unwrap(), 120_050);
        assert_eq!(parse_amount(&json!(" 10 ")).unwrap(), 1_000);
        assert_eq!(parse_amount(&json!(100.10)).unwrap(), 10_010);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for bad in [json!(0), json!(-5), json!("-0.01"), json!("0.00")] {
            let err = parse_amount(&bad).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{:?}", bad);
        }
    }

    #[test]
    fn rejects_non_numeric_input() {
        for bad in [
            json!("abc"),
            json!(""),
            json!("NaN"),
            json!(null),
            json!(true),
            json!([5]),
            json!({"value": 5}),
        ] {
            assert!(parse_amount(&bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn rejects_sub_kobo_precision() {
        assert!(parse_amount(&json!(10.001)).is_err());
        assert!(parse_amount(&json!("0.005")).is_err());
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_minor(500_000), "5000.00");
        assert_eq!(format_minor(5), "0.05");
    }
}
