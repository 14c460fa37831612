//! j2ksec timestamps
//!
//! Every time in VDX is an `f64` count of seconds since the J2000 epoch,
//! 2000-01-01 12:00:00 UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Unix time of the J2000 epoch
pub const J2K_UNIX_OFFSET: f64 = 946_728_000.0;

/// Convert a UTC instant to j2ksec
pub fn to_j2k(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1e6 - J2K_UNIX_OFFSET
}

/// Convert j2ksec to a UTC instant, `None` when out of range
pub fn from_j2k(j2k: f64) -> Option<DateTime<Utc>> {
    if !j2k.is_finite() {
        return None;
    }
    let unix = j2k + J2K_UNIX_OFFSET;
    let secs = unix.floor();
    let nanos = ((unix - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

/// Current time in j2ksec
pub fn now_j2k() -> f64 {
    to_j2k(Utc::now())
}

/// Parse `yyyyMMddHHmmss` with an optional `SSS` millisecond suffix
pub fn parse_compact_date(value: &str) -> Option<f64> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (base, millis) = match value.len() {
        14 => (value, 0u32),
        17 => (&value[..14], value[14..].parse().ok()?),
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S").ok()?;
    Some(to_j2k(Utc.from_utc_datetime(&naive)) + f64::from(millis) / 1000.0)
}

/// Parse a time parameter: `now`, a compact date, or a j2ksec number
pub fn parse_time(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("now") {
        return Some(now_j2k());
    }
    if let Some(t) = parse_compact_date(value) {
        return Some(t);
    }
    value.parse::<f64>().ok().filter(|t| t.is_finite())
}

/// The J2000 epoch as a UTC instant
pub fn j2k_epoch() -> DateTime<Utc> {
    let naive = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

/// Inclusive time interval in j2ksec
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    /// First instant
    pub start: f64,
    /// Last instant
    pub end: f64,
}

impl TimeRange {
    /// Create a range; `start` must not be after `end`
    pub fn new(start: f64, end: f64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Check if `time` falls inside the range (both ends included)
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_epoch_is_zero() {
        assert_relative_eq!(to_j2k(j2k_epoch()), 0.0);
        assert_eq!(from_j2k(0.0), Some(j2k_epoch()));
    }

    #[test]
    fn test_compact_date() {
        assert_relative_eq!(parse_compact_date("20000101120000").unwrap(), 0.0);
        assert_relative_eq!(parse_compact_date("20000101120001500").unwrap(), 1.5);
        assert_relative_eq!(parse_compact_date("20000102120000").unwrap(), 86_400.0);
        assert_eq!(parse_compact_date("2000010112"), None);
        assert_eq!(parse_compact_date("20001301120000"), None);
    }

    #[test]
    fn test_parse_time_forms() {
        assert_eq!(parse_time("3600.5"), Some(3600.5));
        assert_eq!(parse_time("-10"), Some(-10.0));
        assert_relative_eq!(parse_time("19991231120000").unwrap(), -86_400.0);
        assert!(parse_time("NOW").unwrap() > 7.0e8);
        assert_eq!(parse_time("yesterday"), None);
        assert_eq!(parse_time("NaN"), None);
    }

    #[test]
    fn test_range_inclusive() {
        let range = TimeRange::new(10.0, 20.0).unwrap();
        assert!(range.contains(10.0));
        assert!(range.contains(20.0));
        assert!(!range.contains(20.000_001));
        assert!(TimeRange::new(5.0, 1.0).is_none());
        assert_relative_eq!(range.duration(), 10.0);
    }
}
