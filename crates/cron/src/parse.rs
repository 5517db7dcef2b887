//! Parsing utilities for durations and absolute timestamps.

use crate::{Error, Result};

/// Parse a human-friendly duration string into milliseconds.
///
/// Supported suffixes: `s` (seconds), `m` (minutes), `h` (hours), `d` (days).
/// Examples: `"30s"`, `"5m"`, `"2h"`, `"1d"`.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_input("empty duration string"));
    }

    let (num_str, suffix) = match input.find(|c: char| c.is_alphabetic()) {
        Some(i) => (&input[..i], &input[i..]),
        None => {
            return Err(Error::invalid_input(format!(
                "duration missing unit suffix (s/m/h/d): {input}"
            )));
        },
    };

    let value: u64 = num_str
        .parse()
        .map_err(|_| Error::invalid_input(format!("invalid number in duration: {num_str}")))?;

    if value == 0 {
        return Err(Error::invalid_input("duration must be > 0"));
    }

    let unit_ms: u64 = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(Error::invalid_input(format!(
                "unknown duration suffix: {suffix} (expected s/m/h/d)"
            )));
        },
    };

    value
        .checked_mul(unit_ms)
        .ok_or_else(|| Error::invalid_input(format!("duration too large: {input}")))
}

/// Parse an ISO 8601 timestamp string into epoch milliseconds.
///
/// Accepts `"2026-01-12T18:00:00Z"`, a timezone offset, or a naive
/// `"2026-01-12T18:00:00"` which is read in the process-local zone.
pub fn parse_absolute_time_ms(input: &str) -> Result<u64> {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

    let input = input.trim();
    let ms = match input.parse::<DateTime<Utc>>() {
        Ok(dt) => dt.timestamp_millis(),
        Err(e) => {
            let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M"))
                .map_err(|_| Error::invalid_input(format!("invalid ISO 8601 timestamp: {e}")))?;
            Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| Error::invalid_input(format!("nonexistent local time: {input}")))?
                .timestamp_millis()
        },
    };

    if ms < 0 {
        return Err(Error::invalid_input("timestamp is before epoch"));
    }
    Ok(ms as u64)
}
