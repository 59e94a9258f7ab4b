use crate::core::asset::{is_money_range, is_units_valid, COIN, MAX_UNITS};
use crate::error::{AssetError, Result};

fn unit_step(units: u8) -> u64 {
    10u64.pow(u32::from(MAX_UNITS - units))
}

/// Formats a base-unit amount with `units` decimal places, e.g. `150000000` at 2 units is `1.50`.
pub fn format_amount(amount: u64, units: u8) -> Result<String> {
    if !is_units_valid(units) {
        return Err(AssetError::Validation(format!("Invalid units {}", units)));
    }
    let whole = amount / COIN;
    if units == 0 {
        return Ok(whole.to_string());
    }
    let fraction = (amount % COIN) / unit_step(units);
    Ok(format!("{}.{:0width$}", whole, fraction, width = usize::from(units)))
}

/// Parses a decimal amount into base units, refusing more decimal places than `units` allows.
pub fn parse_amount(text: &str, units: u8) -> Result<u64> {
    if !is_units_valid(units) {
        return Err(AssetError::Validation(format!("Invalid units {}", units)));
    }
    let invalid = || AssetError::Validation(format!("Invalid amount '{}'", text));
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) || (text.contains('.') && fraction.is_empty()) {
        return Err(invalid());
    }
    if fraction.len() > usize::from(units) {
        return Err(AssetError::Validation(format!(
            "Amount '{}' has more than {} decimal places",
            text, units
        )));
    }

    let whole: u64 = whole.parse().map_err(|_| invalid())?;
    let mut padded = fraction.to_string();
    while padded.len() < usize::from(MAX_UNITS) {
        padded.push('0');
    }
    let fraction: u64 = padded.parse().map_err(|_| invalid())?;

    let amount = whole
        .checked_mul(COIN)
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(invalid)?;
    if !is_money_range(amount) {
        return Err(AssetError::Validation(format!("Amount '{}' out of range", text)));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1000 * COIN, 0).unwrap(), "1000");
        assert_eq!(format_amount(150_000_000, 2).unwrap(), "1.50");
        assert_eq!(format_amount(1, 8).unwrap(), "0.00000001");
        assert!(format_amount(1, 9).is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000", 0).unwrap(), 1000 * COIN);
        assert_eq!(parse_amount("1.5", 2).unwrap(), 150_000_000);
        assert_eq!(parse_amount("0.00000001", 8).unwrap(), 1);
    }

    #[test]
    fn test_parse_amount_rejects() {
        assert!(parse_amount("1.5", 0).is_err());
        assert!(parse_amount("1.", 2).is_err());
        assert!(parse_amount(".5", 2).is_err());
        assert!(parse_amount("-1", 0).is_err());
        assert!(parse_amount("abc", 0).is_err());
        assert!(parse_amount("99999999999999", 0).is_err());
    }

    #[test]
    fn test_parse_then_format() {
        let amount = parse_amount("12.34", 2).unwrap();
        assert_eq!(format_amount(amount, 2).unwrap(), "12.34");
    }
}
