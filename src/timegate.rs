//! Timestamp Gate — freshness window check against current time.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct GateResult {
    pub valid: bool,
    pub age_seconds: f64,
}

/// Parses an RFC3339 timestamp accepting both trailing `Z` and an explicit
/// offset.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let normalized = if ts.ends_with('Z') {
        format!("{}+00:00", &ts[..ts.len() - 1])
    } else {
        ts.to_string()
    };
    DateTime::parse_from_rfc3339(&normalized).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Checks `|now - ts| <= window_seconds`. Both past and future drift are
/// rejected symmetrically.
pub fn check(ts: &str, now: DateTime<Utc>, window_seconds: i64) -> GateResult {
    match parse_ts(ts) {
        Some(parsed) => {
            let age = (now - parsed).num_milliseconds() as f64 / 1000.0;
            GateResult { valid: age.abs() <= window_seconds as f64, age_seconds: age }
        }
        None => GateResult { valid: false, age_seconds: f64::INFINITY },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn accepts_trailing_z_and_explicit_offset() {
        assert!(parse_ts("2026-07-30T12:00:00Z").is_some());
        assert!(parse_ts("2026-07-30T12:00:00+00:00").is_some());
    }

    #[test]
    fn within_window_accepted() {
        let now = Utc::now();
        let ts = (now - Duration::seconds(60)).to_rfc3339();
        assert!(check(&ts, now, 120).valid);
    }

    #[test]
    fn stale_past_rejected() {
        let now = Utc::now();
        let ts = (now - Duration::seconds(200)).to_rfc3339();
        assert!(!check(&ts, now, 120).valid);
    }

    #[test]
    fn clock_ahead_sensor_rejected_symmetrically() {
        let now = Utc::now();
        let ts = (now + Duration::seconds(200)).to_rfc3339();
        assert!(!check(&ts, now, 120).valid);
    }

    #[test]
    fn doubled_window_for_probe_path() {
        let now = Utc::now();
        let ts = (now - Duration::seconds(200)).to_rfc3339();
        assert!(check(&ts, now, 120 * 2).valid);
    }

    #[test]
    fn malformed_timestamp_rejected() {
        assert!(!check("not-a-timestamp", Utc::now(), 120).valid);
    }
}
