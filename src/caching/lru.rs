use std::{
    hash::Hash,
    time::{Duration, Instant},
};

use indexmap::IndexMap;

/// A bounded least-recently-used cache with an optional time-to-live.
///
/// Entries are kept in access order: reads move an entry to the back, and
/// eviction removes from the front. Values are cloned out rather than
/// borrowed, so callers never hold references into the cache.
#[derive(Debug)]
pub(crate) struct TtlCache<K, V> {
    entries: IndexMap<K, Entry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub(crate) fn new(capacity: usize) -> TtlCache<K, V> {
        TtlCache {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
            ttl: None,
        }
    }

    pub(crate) fn with_ttl(capacity: usize, ttl: Duration) -> TtlCache<K, V> {
        TtlCache {
            ttl: Some(ttl),
            ..TtlCache::new(capacity)
        }
    }

    /// Get a copy of the value for `key`, touching it so it becomes the most
    /// recently used entry. Expired entries are removed rather than returned.
    pub(crate) fn get(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.shift_remove(key)?;
        if let Some(ttl) = self.ttl {
            if entry.stored_at.elapsed() > ttl {
                return None;
            }
        }
        let value = entry.value.clone();
        self.entries.insert(key.clone(), entry);
        Some(value)
    }

    /// Insert a value, evicting the least recently used entries if the cache
    /// is at capacity.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A single cached value with a freshness stamp, used for the per-endpoint
/// network statistics caches. Unlike [`TtlCache`], a stale value remains
/// readable so callers can fall back to it when a refresh fails; the stamp is
/// only advanced on [`CachedValue::set`].
#[derive(Debug)]
pub(crate) struct CachedValue<V> {
    slot: Option<(V, Instant)>,
    ttl: Duration,
}

impl<V: Clone> CachedValue<V> {
    pub(crate) fn new(ttl: Duration) -> CachedValue<V> {
        CachedValue { slot: None, ttl }
    }

    /// The cached value, if it is still within its time-to-live.
    pub(crate) fn fresh(&self) -> Option<V> {
        self.slot
            .as_ref()
            .filter(|(_, stored_at)| stored_at.elapsed() <= self.ttl)
            .map(|(value, _)| value.clone())
    }

    /// The cached value regardless of age.
    pub(crate) fn stale(&self) -> Option<V> {
        self.slot.as_ref().map(|(value, _)| value.clone())
    }

    pub(crate) fn set(&mut self, value: V) {
        self.slot = Some((value, Instant::now()));
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{CachedValue, TtlCache};

    #[test]
    fn get_returns_copy() {
        let mut cache = TtlCache::new(4);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = TtlCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_overwrites() {
        let mut cache = TtlCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let mut cache = TtlCache::with_ttl(4, Duration::ZERO);
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn cached_value_goes_stale_but_stays_readable() {
        let mut cached = CachedValue::new(Duration::ZERO);
        assert_eq!(cached.fresh(), None);
        assert_eq!(cached.stale(), None);

        cached.set(7);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cached.fresh(), None);
        assert_eq!(cached.stale(), Some(7));
    }
}
