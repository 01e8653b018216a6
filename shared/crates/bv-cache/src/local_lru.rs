//! Process-local LRU+TTL for request-scoped artifact bundles (spec.md §7:
//! default cap 200, TTL 600s, keyed by `request_id`).

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

pub struct LocalTtlCache<V> {
    inner: std::sync::Mutex<LruCache<String, TtlEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> LocalTtlCache<V> {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        LocalTtlCache {
            inner: std::sync::Mutex::new(LruCache::new(cap)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut guard = self.inner.lock().expect("lru mutex poisoned");
        guard.put(
            key.into(),
            TtlEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().expect("lru mutex poisoned");
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }
}

impl<V: Clone> Default for LocalTtlCache<V> {
    fn default() -> Self {
        LocalTtlCache::new(200, 600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_within_ttl() {
        let cache: LocalTtlCache<String> = LocalTtlCache::new(2, 600);
        cache.put("r-1", "bundle-bytes".to_string());
        assert_eq!(cache.get("r-1"), Some("bundle-bytes".to_string()));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache: LocalTtlCache<u32> = LocalTtlCache::new(1, 600);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn expires_entries_past_ttl() {
        let cache: LocalTtlCache<u32> = LocalTtlCache::new(4, 0);
        cache.put("a", 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.get("a"), None);
    }
}
