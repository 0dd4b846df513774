//! Process-wide error-taxonomy counters, surfaced via `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::validator::Verdict;

pub struct Metrics {
    validated: AtomicU64,
    rejected: AtomicU64,
    replayed: AtomicU64,
    forwarded: AtomicU64,
    permanently_failed: AtomicU64,
    back_pressure: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            validated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            permanently_failed: AtomicU64::new(0),
            back_pressure: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub validated: u64,
    pub rejected: u64,
    pub replayed: u64,
    pub forwarded: u64,
    pub permanently_failed: u64,
    pub back_pressure: u64,
}

impl Metrics {
    /// Records a terminal validation outcome. `replayed` is a sub-count of
    /// `rejected` (a replay attack is always rejected) kept separately since
    /// it is the one rejection reason the control plane must break out.
    pub fn record_verdict(&self, verdict: &Verdict) {
        if verdict.ok {
            self.validated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        if verdict.security_events.iter().any(|e| e.event_type == "security.replay_attack") {
            self.replayed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permanently_failed(&self) {
        self.permanently_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_back_pressure(&self) {
        self.back_pressure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            permanently_failed: self.permanently_failed.load(Ordering::Relaxed),
            back_pressure: self.back_pressure.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SecurityEvent;
    use serde_json::json;

    fn ok_verdict() -> Verdict {
        Verdict { ok: true, ..Verdict::default() }
    }

    fn rejected_verdict(event_type: &str) -> Verdict {
        let mut v = Verdict { ok: false, ..Verdict::default() };
        v.security_events.push(SecurityEvent::new(event_type, "ERROR", "temp-01", json!({})));
        v
    }

    #[test]
    fn counts_validated_and_rejected_separately() {
        let m = Metrics::default();
        m.record_verdict(&ok_verdict());
        m.record_verdict(&rejected_verdict("security.invalid_signature"));
        let snap = m.snapshot();
        assert_eq!(snap.validated, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.replayed, 0);
    }

    #[test]
    fn replay_attack_counts_as_both_rejected_and_replayed() {
        let m = Metrics::default();
        m.record_verdict(&rejected_verdict("security.replay_attack"));
        let snap = m.snapshot();
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.replayed, 1);
    }
}
