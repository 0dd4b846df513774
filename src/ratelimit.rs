//! Rate Limiter — per-sensor token/leaky bucket admission.
//!
//! Per-sensor bucket state lives in a `DashMap`, refilled (or leaked) and
//! consumed under a single entry lock so concurrent admissions for
//! different sensors never contend.

use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Throttled,
}

struct Bucket {
    /// Tokens remaining (token bucket) or level occupied (leaky bucket).
    level: f64,
    last_update: Instant,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SensorStats {
    pub total: u64,
    pub admitted: u64,
    pub throttled: u64,
    pub last_request_unix_ms: Option<i64>,
}

struct Counters {
    total: std::sync::atomic::AtomicU64,
    admitted: std::sync::atomic::AtomicU64,
    throttled: std::sync::atomic::AtomicU64,
    last_request_unix_ms: std::sync::atomic::AtomicI64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total: 0.into(),
            admitted: 0.into(),
            throttled: 0.into(),
            last_request_unix_ms: 0.into(),
        }
    }
}

pub struct RateLimiter {
    capacity: f64,
    rate_per_sec: f64,
    algorithm: Algorithm,
    buckets: DashMap<String, Bucket>,
    stats: DashMap<String, Counters>,
}

impl RateLimiter {
    pub fn new(messages_per_minute: u32, burst_capacity: u32, algorithm: Algorithm) -> Self {
        Self {
            capacity: burst_capacity as f64,
            rate_per_sec: messages_per_minute as f64 / 60.0,
            algorithm,
            buckets: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Refills/leaks based on elapsed wall-clock since the last call, then
    /// attempts to consume one unit. Refill is applied before consumption,
    /// so a message after an idle period at least one inter-arrival long is
    /// always admitted.
    pub fn admit(&self, sensor_id: &str) -> Admission {
        let now = Instant::now();
        let mut entry = self.buckets.entry(sensor_id.to_string()).or_insert_with(|| Bucket {
            level: match self.algorithm {
                Algorithm::TokenBucket => self.capacity,
                Algorithm::LeakyBucket => 0.0,
            },
            last_update: now,
        });

        let elapsed = now.duration_since(entry.last_update).as_secs_f64();
        entry.last_update = now;

        let admitted = match self.algorithm {
            Algorithm::TokenBucket => {
                entry.level = (entry.level + elapsed * self.rate_per_sec).min(self.capacity);
                if entry.level >= 1.0 {
                    entry.level -= 1.0;
                    true
                } else {
                    false
                }
            }
            Algorithm::LeakyBucket => {
                entry.level = (entry.level - elapsed * self.rate_per_sec).max(0.0);
                if entry.level + 1.0 <= self.capacity {
                    entry.level += 1.0;
                    true
                } else {
                    false
                }
            }
        };
        drop(entry);

        let counters = self.stats.entry(sensor_id.to_string()).or_default();
        counters.total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        counters.last_request_unix_ms.store(
            chrono::Utc::now().timestamp_millis(),
            std::sync::atomic::Ordering::Relaxed,
        );
        if admitted {
            counters.admitted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Admission::Admitted
        } else {
            counters.throttled.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Admission::Throttled
        }
    }

    pub fn stats_for(&self, sensor_id: &str) -> SensorStats {
        use std::sync::atomic::Ordering::Relaxed;
        match self.stats.get(sensor_id) {
            Some(c) => SensorStats {
                total: c.total.load(Relaxed),
                admitted: c.admitted.load(Relaxed),
                throttled: c.throttled.load(Relaxed),
                last_request_unix_ms: match c.last_request_unix_ms.load(Relaxed) {
                    0 => None,
                    ms => Some(ms),
                },
            },
            None => SensorStats::default(),
        }
    }

    pub fn all_stats(&self) -> std::collections::BTreeMap<String, SensorStats> {
        self.stats.iter().map(|e| (e.key().clone(), self.stats_for(e.key()))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let rl = RateLimiter::new(60, 10, Algorithm::TokenBucket);
        let mut admitted = 0;
        for _ in 0..20 {
            if rl.admit("temp-01") == Admission::Admitted {
                admitted += 1;
            }
        }
        // 20 calls with burst=10, rate=1/s back-to-back admits exactly 10.
        assert_eq!(admitted, 10);
    }

    #[test]
    fn per_sensor_isolation() {
        let rl = RateLimiter::new(60, 1, Algorithm::TokenBucket);
        assert_eq!(rl.admit("a"), Admission::Admitted);
        assert_eq!(rl.admit("a"), Admission::Throttled);
        assert_eq!(rl.admit("b"), Admission::Admitted, "separate sensor must have its own bucket");
    }

    #[test]
    fn leaky_bucket_also_throttles_on_burst() {
        let rl = RateLimiter::new(60, 3, Algorithm::LeakyBucket);
        let mut admitted = 0;
        for _ in 0..10 {
            if rl.admit("s") == Admission::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[test]
    fn stats_track_admitted_and_throttled() {
        let rl = RateLimiter::new(60, 1, Algorithm::TokenBucket);
        rl.admit("a");
        rl.admit("a");
        let stats = rl.stats_for("a");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.throttled, 1);
    }
}
