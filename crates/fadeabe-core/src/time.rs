//! Time sources and expiry parsing.
//!
//! All times in fadeabe are Unix milliseconds as `i64`. Components read the
//! time through a [`Clock`] so that tests can move it by hand.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{CoreError, Result};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in Unix milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Start at `now` (Unix ms).
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `ms` and return the new time.
    pub fn advance(&self, ms: i64) -> i64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Offset used for date-only expiries when none is configured (UTC+09:00).
pub fn default_expiry_offset() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
}

/// An explicit expiry for a static attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirySpec {
    /// Absolute Unix milliseconds.
    At(i64),
    /// `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, or a plain integer of Unix ms.
    Date(String),
}

impl ExpirySpec {
    /// Resolve to Unix milliseconds, reading dates in `offset`.
    pub fn resolve(&self, offset: FixedOffset) -> Result<i64> {
        match self {
            ExpirySpec::At(ms) => Ok(*ms),
            ExpirySpec::Date(text) => parse_expiry(text, offset),
        }
    }
}

/// Parse an expiry string.
///
/// A date without a time means the start of that day in `offset`.
pub fn parse_expiry(text: &str, offset: FixedOffset) -> Result<i64> {
    let text = text.trim();
    let invalid = || CoreError::InvalidExpiry(text.to_string());

    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }

    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| invalid())?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(clock.advance(3_601_000), 3_602_000);
        clock.set(5);
        assert_eq!(clock.now_millis(), 5);
    }

    #[test]
    fn test_parse_datetime_in_offset() {
        // 2025-01-01 09:00:00 +09:00 == 2025-01-01 00:00:00 UTC
        let ms = parse_expiry("2025-01-01 09:00:00", default_expiry_offset()).unwrap();
        assert_eq!(ms, 1_735_689_600_000);
    }

    #[test]
    fn test_parse_date_only() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let ms = parse_expiry("2025-01-01", utc).unwrap();
        assert_eq!(ms, 1_735_689_600_000);
    }

    #[test]
    fn test_parse_millis_and_invalid() {
        let offset = default_expiry_offset();
        assert_eq!(parse_expiry("1700000000000", offset).unwrap(), 1_700_000_000_000);
        assert!(matches!(
            parse_expiry("next tuesday", offset),
            Err(CoreError::InvalidExpiry(_))
        ));
        assert!(ExpirySpec::Date("2025-13-01".into()).resolve(offset).is_err());
        assert_eq!(ExpirySpec::At(42).resolve(offset).unwrap(), 42);
    }
}
