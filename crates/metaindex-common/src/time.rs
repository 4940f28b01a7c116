//! Time-range expressions for history queries
//!
//! Bounds are epoch milliseconds, given either as absolute numbers or
//! relative to the current time: `now`, `now-30s`, `now-2h`, `now+1d`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Inclusive range of epoch milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    /// Create a range, rejecting reversed bounds
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_time_range(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds relative to `now`
    pub fn parse(start: &str, end: &str, now: u64) -> Result<Self> {
        Self::new(parse_time(start, now)?, parse_time(end, now)?)
    }

    /// Whether `timestamp` falls inside the range
    #[must_use]
    pub const fn contains(&self, timestamp: u64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// Parse one bound: epoch millis or `now[(+|-)<n><unit>]`
pub fn parse_time(expr: &str, now: u64) -> Result<u64> {
    let expr = expr.trim();
    if let Some(offset) = expr.strip_prefix("now") {
        if offset.is_empty() {
            return Ok(now);
        }
        let (negative, amount) = if let Some(rest) = offset.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = offset.strip_prefix('+') {
            (false, rest)
        } else {
            return Err(Error::invalid_time_range(format!(
                "expected '+' or '-' after 'now' in '{expr}'"
            )));
        };
        let delta = parse_duration_millis(amount)
            .ok_or_else(|| Error::invalid_time_range(format!("invalid offset in '{expr}'")))?;
        let resolved = if negative {
            now.checked_sub(delta)
        } else {
            now.checked_add(delta)
        };
        return resolved
            .ok_or_else(|| Error::invalid_time_range(format!("'{expr}' is out of range")));
    }

    let value: i64 = expr
        .parse()
        .map_err(|_| Error::invalid_time_range(format!("'{expr}' is not a timestamp")))?;
    u64::try_from(value)
        .map_err(|_| Error::invalid_time_range(format!("negative timestamp {value}")))
}

/// `<n><unit>` with unit one of s, m, h, d
fn parse_duration_millis(amount: &str) -> Option<u64> {
    let unit = amount.chars().last()?;
    let multiplier: u64 = match unit {
        's' => 1_000,
        'm' => 60 * 1_000,
        'h' => 60 * 60 * 1_000,
        'd' => 24 * 60 * 60 * 1_000,
        _ => return None,
    };
    let digits = &amount[..amount.len() - 1];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn test_parse_absolute() {
        assert_eq!(parse_time("12345", NOW).unwrap(), 12345);
        assert_eq!(parse_time("  0 ", NOW).unwrap(), 0);
    }

    #[test]
    fn test_parse_relative() {
        assert_eq!(parse_time("now", NOW).unwrap(), NOW);
        assert_eq!(parse_time("now-30s", NOW).unwrap(), NOW - 30_000);
        assert_eq!(parse_time("now-2m", NOW).unwrap(), NOW - 120_000);
        assert_eq!(parse_time("now+1h", NOW).unwrap(), NOW + 3_600_000);
        assert_eq!(parse_time("now-1d", NOW).unwrap(), NOW - 86_400_000);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_time("-5", NOW).is_err()); // Negative
        assert!(parse_time("yesterday", NOW).is_err()); // Non-numeric
        assert!(parse_time("now-5w", NOW).is_err()); // Unknown unit
        assert!(parse_time("now-s", NOW).is_err()); // Missing amount
        assert!(parse_time("now*5s", NOW).is_err()); // Bad operator
        assert!(parse_time("now-100000d", 1_000).is_err()); // Before epoch
    }

    #[test]
    fn test_range_bounds() {
        let range = TimeRange::parse("now-1h", "now", NOW).unwrap();
        assert!(range.contains(NOW));
        assert!(range.contains(NOW - 3_600_000));
        assert!(!range.contains(NOW + 1));

        let err = TimeRange::parse("now", "now-1h", NOW).unwrap_err();
        assert!(matches!(err, Error::InvalidTimeRange(_)));
    }
}
