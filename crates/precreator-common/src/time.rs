//! ---
//! prc_section: "01-core-functionality"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shared primitives and utilities for the precreator runtime."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Capture the wall-clock timestamp used for precreation horizons.
pub fn wall_clock_now() -> DateTime<Utc> {
    Utc::now()
}

/// Source of "now" for scheduled work.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        wall_clock_now()
    }
}

/// Convert a std duration into a chrono duration, saturating at the chrono maximum.
pub fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// Advance `now` by `period`, clamping at the largest representable timestamp.
pub fn advance(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(period))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Align `timestamp` down to a multiple of `window` counted from the Unix epoch.
///
/// A zero window leaves the timestamp untouched, as does a timestamp whose
/// aligned start falls below the nanosecond range.
pub fn truncate(timestamp: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ns = window.as_nanos();
    if window_ns == 0 {
        return timestamp;
    }
    let Some(ts_ns) = timestamp.timestamp_nanos_opt() else {
        return timestamp;
    };
    let window_ns = window_ns.min(i64::MAX as u128) as i64;
    match ts_ns.checked_sub(ts_ns.rem_euclid(window_ns)) {
        Some(aligned) => DateTime::<Utc>::from_timestamp_nanos(aligned),
        None => timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_adds_period() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cutoff = advance(now, Duration::from_secs(300));
        assert_eq!(cutoff - now, ChronoDuration::minutes(5));
    }

    #[test]
    fn advance_saturates() {
        let cutoff = advance(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(cutoff, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn truncate_aligns_to_window() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 13, 47, 12).unwrap();
        let aligned = truncate(ts, Duration::from_secs(3600));
        assert_eq!(aligned, Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn truncate_handles_pre_epoch() {
        let ts = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        let aligned = truncate(ts, Duration::from_secs(3600));
        assert_eq!(aligned, Utc.with_ymd_and_hms(1969, 12, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn truncate_near_lower_bound_does_not_overflow() {
        let ts = DateTime::<Utc>::from_timestamp_nanos(i64::MIN + 1);
        let week = Duration::from_secs(7 * 24 * 60 * 60);
        assert_eq!(truncate(ts, week), ts);
    }
}
