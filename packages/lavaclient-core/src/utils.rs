//! General utilities shared across the library.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{LavaError, LavaResult};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Formats a duration in milliseconds as `HH:MM:SS`, or `MM:SS` under an hour.
#[must_use]
pub fn format_time(millis: u64) -> String {
    let total = millis / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Parses `SS`, `MM:SS` or `HH:MM:SS` into milliseconds.
pub fn parse_time(input: &str) -> LavaResult<u64> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(LavaError::Validation(format!("invalid time: {input}")));
    }

    let mut seconds = 0u64;
    for part in &parts {
        let value: u64 = part
            .parse()
            .map_err(|_| LavaError::Validation(format!("invalid time: {input}")))?;
        seconds = seconds * 60 + value;
    }
    Ok(seconds * 1000)
}
