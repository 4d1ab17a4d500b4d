//! SQLite helper utilities for type conversion
//!
//! Timestamps are stored as INTEGER unix seconds and sizes/indices as
//! INTEGER (i64). These helpers convert between those and the Rust types.

use chrono::{DateTime, Utc};

/// Current time as unix seconds
#[inline]
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Convert unix seconds back to a UTC datetime (epoch on overflow)
#[inline]
pub fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

/// Store a u64 in an INTEGER column, saturating at i64::MAX
#[inline]
pub fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read a u64 back from an INTEGER column, clamping negatives to 0
#[inline]
pub fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Unix-seconds cutoff for rows younger than `ttl_days`
#[inline]
pub fn ttl_cutoff(ttl_days: u32) -> i64 {
    now_unix() - i64::from(ttl_days) * 86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_roundtrip() {
        let now = now_unix();
        assert_eq!(unix_to_datetime(now).timestamp(), now);
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(u64_to_i64(u64::MAX), i64::MAX);
        assert_eq!(u64_to_i64(42), 42);
        assert_eq!(i64_to_u64(-5), 0);
        assert_eq!(i64_to_u64(7), 7);
    }

    #[test]
    fn test_ttl_cutoff() {
        let cutoff = ttl_cutoff(30);
        let expected = now_unix() - 30 * 86_400;
        assert!((cutoff - expected).abs() <= 1);
    }
}
