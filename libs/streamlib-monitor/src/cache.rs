// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Short-lived payload cache shared by every client.
//!
//! Many clients asking for the same query on overlapping ticks pay for one
//! serialization per freshness window. Each key has its own slot mutex, so
//! concurrent callers for one key wait for the first computation instead of
//! repeating it, while other keys proceed independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::Result;

/// Prefix of the full node list key. Each monitor appends its own id.
pub const TOPOLOGY_KEY_PREFIX: &str = "filters:all";

/// Cache key of the full node list of one monitor.
pub fn topology_key(monitor_id: u64) -> String {
    format!("{}:{}", TOPOLOGY_KEY_PREFIX, monitor_id)
}

/// Entries older than this multiple of the longest requested max age are pruned.
const EVICTION_AGE_FACTOR: u32 = 4;

static GLOBAL_CACHE: LazyLock<Arc<SerializationCache>> =
    LazyLock::new(|| Arc::new(SerializationCache::new()));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<str>,
    written_at: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

pub struct SerializationCache {
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    longest_max_age_ms: AtomicU64,
}

impl SerializationCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            longest_max_age_ms: AtomicU64::new(0),
        }
    }

    /// Process-wide cache instance.
    pub fn global() -> Arc<SerializationCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Return the cached payload for `key` if it is at most `max_age` old,
    /// otherwise run `compute` once and store its result.
    ///
    /// A failing `compute` stores nothing and its error is returned as is.
    pub fn get_or_compute<F>(&self, key: &str, max_age: Duration, compute: F) -> Result<Arc<str>>
    where
        F: FnOnce() -> Result<String>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock();

        if let Some(cached) = entry.as_ref() {
            if Instant::now().saturating_duration_since(cached.written_at) <= max_age {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&cached.payload));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let payload: Arc<str> = Arc::from(compute()?);
        let written_at = Instant::now();
        *entry = Some(CacheEntry {
            payload: Arc::clone(&payload),
            written_at,
        });
        drop(entry);

        self.longest_max_age_ms
            .fetch_max(max_age.as_millis() as u64, Ordering::Relaxed);
        self.evict_stale(written_at);

        Ok(payload)
    }

    /// Drop one entry, or every entry when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut slots = self.slots.lock();
        match key {
            Some(key) => {
                slots.remove(key);
            }
            None => slots.clear(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock();
        // A slot locked by an in-flight computation counts as occupied.
        let size = slots
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |entry| entry.is_some()))
            .count();

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
        }
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let slot = Slot::default();
        slots.insert(key.to_string(), Arc::clone(&slot));
        slot
    }

    fn evict_stale(&self, now: Instant) {
        let longest = Duration::from_millis(self.longest_max_age_ms.load(Ordering::Relaxed));
        let horizon = longest * EVICTION_AGE_FACTOR;

        self.slots.lock().retain(|_, slot| {
            // Held elsewhere: a caller is about to fill it.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Some(entry) => entry
                    .as_ref()
                    .is_some_and(|e| now.saturating_duration_since(e.written_at) <= horizon),
                None => true,
            }
        });
    }
}

impl Default for SerializationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use std::sync::atomic::AtomicUsize;

    const AGE: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_within_age_returns_identical_payload() {
        let cache = SerializationCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("[1,2,3]".to_string())
        };

        let first = cache.get_or_compute("k", AGE, compute).unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        let second = cache
            .get_or_compute("k", AGE, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, size: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_age_recomputes_exactly_once() {
        let cache = SerializationCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("v{}", n))
        };

        cache.get_or_compute("k", AGE, compute).unwrap();
        tokio::time::advance(Duration::from_millis(501)).await;

        let fresh = cache.get_or_compute("k", AGE, compute).unwrap();
        let again = cache.get_or_compute("k", AGE, compute).unwrap();

        assert_eq!(&*fresh, "v1");
        assert_eq!(&*again, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stricter_caller_never_sees_older_entry() {
        let cache = SerializationCache::new();
        cache
            .get_or_compute("k", AGE, || Ok("old".to_string()))
            .unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;

        let strict = cache
            .get_or_compute("k", Duration::from_millis(100), || Ok("new".to_string()))
            .unwrap();
        assert_eq!(&*strict, "new");
    }

    #[test]
    fn test_compute_error_propagates_and_stores_nothing() {
        let cache = SerializationCache::new();
        let result = cache.get_or_compute("k", AGE, || {
            Err(MonitorError::NotFound("graph gone".to_string()))
        });

        assert!(matches!(result, Err(MonitorError::NotFound(_))));
        assert_eq!(cache.stats().size, 0);

        let ok = cache.get_or_compute("k", AGE, || Ok("x".to_string())).unwrap();
        assert_eq!(&*ok, "x");
    }

    #[test]
    fn test_clear_one_and_all() {
        let cache = SerializationCache::new();
        cache.get_or_compute("a", AGE, || Ok("a".to_string())).unwrap();
        cache.get_or_compute("b", AGE, || Ok("b".to_string())).unwrap();

        cache.clear(Some("a"));
        assert_eq!(cache.stats().size, 1);

        cache.clear(None);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_concurrent_callers_compute_once() {
        let cache = Arc::new(SerializationCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_compute("all", Duration::from_secs(60), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok("payload".to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(&*handle.join().unwrap(), "payload");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_are_evicted_on_write() {
        let cache = SerializationCache::new();
        cache.get_or_compute("old", AGE, || Ok("o".to_string())).unwrap();
        tokio::time::advance(AGE * 5).await;

        cache.get_or_compute("new", AGE, || Ok("n".to_string())).unwrap();
        assert_eq!(cache.stats().size, 1);
    }
}
