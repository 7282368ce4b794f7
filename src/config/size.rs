//! Human-readable size strings ("5MB", "1024", "2GB")

use crate::error::{LogError, LogResult};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Parse a size string into bytes.
///
/// Accepts an integer or decimal number followed by an optional `B`, `KB`,
/// `MB` or `GB` suffix, case-insensitively. A bare number is bytes.
///
/// # Errors
///
/// Returns [`LogError::Validation`] for empty input, an unknown suffix, or a
/// missing or non-numeric amount.
pub fn parse_size(input: &str) -> LogResult<u64> {
    let normalized = input.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(LogError::validation("size string is empty"));
    }

    let (amount, multiplier) = if let Some(n) = normalized.strip_suffix("GB") {
        (n, GB)
    } else if let Some(n) = normalized.strip_suffix("MB") {
        (n, MB)
    } else if let Some(n) = normalized.strip_suffix("KB") {
        (n, KB)
    } else if let Some(n) = normalized.strip_suffix('B') {
        (n, 1)
    } else {
        (normalized.as_str(), 1)
    };

    let amount = amount.trim();
    let invalid = || LogError::validation(format!("invalid size string: {input:?}"));

    if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }

    if amount.contains('.') {
        let value: f64 = amount.parse().map_err(|_| invalid())?;
        Ok((value * multiplier as f64) as u64)
    } else {
        let value: u64 = amount.parse().map_err(|_| invalid())?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| LogError::validation(format!("size overflows: {input:?}")))
    }
}
