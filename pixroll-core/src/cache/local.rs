use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::record::ImageRecord;

pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity in-process cache with access-order (LRU) eviction.
///
/// Entries carry no TTL; they live until evicted by capacity pressure or
/// removed explicitly (stale-file invalidation, manifest rebuild). All
/// mutations funnel through a single critical section so concurrent readers
/// and writers cannot corrupt the recency order.
#[derive(Debug)]
pub struct LocalCache {
    entries: Mutex<LruCache<String, ImageRecord>>,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a record; a hit refreshes the key's recency.
    pub fn get(&self, key: &str) -> Option<ImageRecord> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert a record, evicting the least-recently-used entry at capacity.
    pub fn set(&self, key: &str, record: ImageRecord) {
        self.entries.lock().put(key.to_string(), record);
    }

    /// Remove a single entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Drop every entry. Called after a manifest rebuild, when cached paths
    /// may no longer match the filesystem.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(path: &str) -> ImageRecord {
        ImageRecord {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            size: 1,
            mtime: Utc::now(),
            path: path.to_string(),
        }
    }

    #[test]
    fn evicts_exactly_the_least_recently_used_entry() {
        let cache = LocalCache::new(3);
        cache.set("a", record("a.png"));
        cache.set("b", record("b.png"));
        cache.set("c", record("c.png"));

        cache.set("d", record("d.png"));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn a_get_protects_an_entry_from_eviction() {
        let cache = LocalCache::new(3);
        cache.set("a", record("a.png"));
        cache.set("b", record("b.png"));
        cache.set("c", record("c.png"));

        // "a" becomes most recently used, so "b" is now the oldest.
        assert!(cache.get("a").is_some());
        cache.set("d", record("d.png"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn remove_and_clear() {
        let cache = LocalCache::new(2);
        cache.set("a", record("a.png"));
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));

        cache.set("a", record("a.png"));
        cache.set("b", record("b.png"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let cache = LocalCache::new(0);
        cache.set("a", record("a.png"));
        assert_eq!(cache.len(), 1);
        cache.set("b", record("b.png"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b").is_some());
    }
}
