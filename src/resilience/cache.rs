//! TTL response cache for idempotent downstream reads.
//!
//! Entries become invisible once `now >= expires_at`. Writes through the gateway do not
//! purge related entries: a read may return data up to `ttl` old after a mutation.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Size and lifetime figures for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

/// A thread-safe, bounded TTL cache.
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    inner: Arc<DashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Default lifetime for [`TtlCache::insert`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`, if any. Expired entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.inner.get(key) {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
        }
        self.inner.remove_if(key, |_, entry| now >= entry.expires_at);
        None
    }

    /// Store with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.put(key, value, self.ttl);
    }

    /// Store with an explicit TTL, overwriting any previous entry.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();

        if !self.inner.contains_key(&key) && self.inner.len() >= self.max_entries {
            self.make_room(now);
        }

        self.inner.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn make_room(&self, now: Instant) {
        self.inner.retain(|_, entry| now < entry.expires_at);
        if self.inner.len() < self.max_entries {
            return;
        }

        let oldest = self
            .inner
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.inner.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.len(),
            ttl_secs: self.ttl.as_secs(),
            max_entries: self.max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = TtlCache::new(Duration::from_secs(10), 8);
        cache.insert("devices", 1);

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get("devices"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("devices"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_expiry() {
        let cache = TtlCache::new(Duration::from_secs(10), 8);
        cache.insert("k", "old");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("k", "new");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k"), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_evicts_soonest_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.put("a", 1, Duration::from_secs(5));
        cache.put("b", 2, Duration::from_secs(50));
        cache.put("c", 3, Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_stats() {
        let cache: TtlCache<u8> = TtlCache::new(Duration::from_secs(60), 128);
        cache.insert("x", 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                size: 1,
                ttl_secs: 60,
                max_entries: 128
            }
        );
    }
}
