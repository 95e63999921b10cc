//! Bounded freshness filter for observed nonces.
//!
//! Replay protection here is a freshness filter, not a permanent ledger:
//! peers rotate nonces every message and the timestamp skew bound caps
//! how old a replayable record can be, so a bounded window of recently
//! seen values is sufficient. Nothing persists across restarts.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use crate::error::SessionError;

pub struct NonceCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl NonceCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Atomically insert `nonce` if it has not been observed within the
    /// retention window. When the cache is full, the oldest observation
    /// is evicted first.
    pub fn check(&self, nonce: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.seen.contains(nonce) {
            return Err(SessionError::ReplayDetected {
                nonce: nonce.to_string(),
            });
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.seen.insert(nonce.to_string());
        inner.order.push_back(nonce.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn duplicate_is_rejected() {
        let cache = NonceCache::new(16);
        cache.check("n-1").unwrap();
        let err = cache.check("n-1").unwrap_err();
        assert!(matches!(err, SessionError::ReplayDetected { .. }));
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let cache = NonceCache::new(2);
        cache.check("n-1").unwrap();
        cache.check("n-2").unwrap();
        cache.check("n-3").unwrap();
        assert_eq!(cache.len(), 2);
        // n-1 fell out of the window and is accepted again.
        cache.check("n-1").unwrap();
        // n-3 is still retained.
        assert!(cache.check("n-3").is_err());
    }

    #[test]
    fn concurrent_checks_admit_exactly_one() {
        let cache = Arc::new(NonceCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.check("contested").is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
