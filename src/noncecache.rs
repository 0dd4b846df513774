//! Nonce Cache — bounded LRU set of recently-seen nonces (replay guard).
//!
//! Guarded by a plain `Mutex` rather than a concurrent map, since `lru`'s
//! cache needs exclusive access to update its eviction order on every read.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    Fresh,
    Seen,
}

pub struct NonceCache {
    inner: Mutex<LruCache<String, ()>>,
}

impl NonceCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self { inner: Mutex::new(LruCache::new(cap)) }
    }

    /// Atomic check-and-record: if `nonce` is present, returns `Seen`;
    /// otherwise inserts and returns `Fresh`.
    pub fn check_and_record(&self, nonce: &str) -> NonceOutcome {
        let mut cache = self.inner.lock().expect("nonce cache mutex poisoned");
        if cache.contains(nonce) {
            // touch so repeated hits stay warm under LRU ordering too
            cache.get(nonce);
            NonceOutcome::Seen
        } else {
            cache.put(nonce.to_string(), ());
            NonceOutcome::Fresh
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("nonce cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_fresh() {
        let cache = NonceCache::new(10);
        assert_eq!(cache.check_and_record("n1"), NonceOutcome::Fresh);
    }

    #[test]
    fn replay_is_seen() {
        let cache = NonceCache::new(10);
        assert_eq!(cache.check_and_record("n1"), NonceOutcome::Fresh);
        assert_eq!(cache.check_and_record("n1"), NonceOutcome::Seen);
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let cache = NonceCache::new(2);
        cache.check_and_record("n1");
        cache.check_and_record("n2");
        cache.check_and_record("n3"); // evicts n1
        assert_eq!(cache.check_and_record("n1"), NonceOutcome::Fresh, "n1 should have been evicted");
        assert_eq!(cache.len(), 2);
    }
}
