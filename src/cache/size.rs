//! Byte sizes written as `digits (KB|MB)?`.

use crate::error::{EngineError, Result};

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

/// Parse a memory budget such as `512`, `4kb` or `10MB`.
///
/// Units are case-insensitive; bare digits are bytes.
pub fn parse_size(text: &str) -> Result<u64> {
    let invalid = || EngineError::config(format!("invalid cache size '{text}', expected digits optionally followed by KB or MB"));

    let upper = text.to_ascii_uppercase();
    let (digits, unit) = if let Some(d) = upper.strip_suffix("KB") {
        (d, KB)
    } else if let Some(d) = upper.strip_suffix("MB") {
        (d, MB)
    } else {
        (upper.as_str(), 1)
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or_else(invalid)
}
