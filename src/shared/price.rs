//! Decimal helpers for price and size strings.
//!
//! The API sends prices and sizes as decimal strings (e.g. `"97250.5"`) to avoid
//! float rounding. These helpers turn them into [`Decimal`] values on demand.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse a decimal string, returning `None` for empty or malformed input.
pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Midpoint of two prices.
pub fn midpoint(bid: Decimal, ask: Decimal) -> Decimal {
    (bid + ask) / Decimal::TWO
}

/// Spread in basis points relative to the midpoint.
pub fn spread_bps(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    let mid = midpoint(bid, ask);
    if mid.is_zero() {
        return None;
    }
    Some((ask - bid) / mid * Decimal::from(10_000))
}
