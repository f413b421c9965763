//! Decimal token amounts to and from integer base units.

use alloy_primitives::U256;

pub const ETHER_DECIMALS: u8 = 18;

/// Parses a human decimal such as `"0.5"` or `"1000000"` into base units.
pub fn parse_units(raw: &str, decimals: u8) -> Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("amount cannot be empty".to_string());
    }
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("'{trimmed}' is not a decimal amount"));
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(format!("'{trimmed}' is not a non-negative decimal amount"));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(format!(
            "'{trimmed}' has more than {decimals} fractional digits"
        ));
    }

    let mut digits = String::with_capacity(whole.len() + usize::from(decimals));
    digits.push_str(whole);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat('0').take(usize::from(decimals) - fraction.len()));
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| format!("'{trimmed}' is too large"))
}

/// Formats base units as a trimmed decimal, e.g. `420000000000000000` → `"0.42"`.
#[must_use]
pub fn format_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}
