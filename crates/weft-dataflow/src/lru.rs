//! A bounded cache with least-recently-used eviction.
//!
//! Recency is tracked with a strictly monotonic stamp per entry, so "least
//! recently used" is always unambiguous: stamps never collide, and the
//! earliest-inserted entry among untouched ones carries the oldest stamp by
//! construction. Any `get`, `put`, or `touch` of a key counts as a use.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

struct CacheEntry<V> {
    value: V,
    stamp: u64,
}

struct LruInner<K, V> {
    entries: FxHashMap<K, CacheEntry<V>>,
    /// Recency index: stamp -> key. The smallest stamp is the eviction
    /// candidate.
    recency: BTreeMap<u64, K>,
    clock: u64,
}

/// A thread-safe bounded map with LRU eviction.
///
/// All operations are total: nothing here blocks beyond the internal mutex
/// and nothing fails.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<LruInner<K, V>>,
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "cache capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                entries: FxHashMap::default(),
                recency: BTreeMap::new(),
                clock: 0,
            }),
        }
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let entry = inner.entries.get_mut(key)?;
        inner.recency.remove(&entry.stamp);
        inner.clock += 1;
        entry.stamp = inner.clock;
        inner.recency.insert(inner.clock, key.clone());
        Some(entry.value.clone())
    }

    /// Insert or overwrite `key`, marking it most-recently-used. Inserting
    /// a new key into a full cache first evicts the least-recently-used
    /// entry.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.clock += 1;
        let stamp = inner.clock;

        if let Some(entry) = inner.entries.get_mut(&key) {
            inner.recency.remove(&entry.stamp);
            entry.value = value;
            entry.stamp = stamp;
            inner.recency.insert(stamp, key);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some((_, oldest)) = inner.recency.pop_first() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(key.clone(), CacheEntry { value, stamp });
        inner.recency.insert(stamp, key);
    }

    /// Update `key` to `value` and bump its recency, whether or not it is
    /// already present. Spelled separately from [`put`](Self::put) for call
    /// sites that want the update-and-bump guarantee explicit.
    pub fn touch(&self, key: K, value: V) {
        self.put(key, value);
    }

    /// Look up `key` or insert the result of `f`, in one atomic step.
    /// Returns the value and whether `f` ran. `f` executes under the cache
    /// lock, so it should be cheap; store cells, not computations.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.clock += 1;
        let stamp = inner.clock;

        if let Some(entry) = inner.entries.get_mut(&key) {
            inner.recency.remove(&entry.stamp);
            entry.stamp = stamp;
            inner.recency.insert(stamp, key);
            return (entry.value.clone(), false);
        }

        let value = f();
        if inner.entries.len() >= self.capacity {
            if let Some((_, oldest)) = inner.recency.pop_first() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                stamp,
            },
        );
        inner.recency.insert(stamp, key);
        (value, true)
    }

    /// Number of cached entries. Never exceeds the capacity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_refreshes_recency() {
        let cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("d", 4);

        // "b" was the least recently used once "a" was read.
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn touch_updates_value_and_recency() {
        let cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.touch("a", 11);
        cache.put("d", 4);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(11));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
    }

    #[test]
    fn overwrite_counts_as_a_use() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10); // "a" is now the most recent
        cache.put("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn untouched_entries_evict_in_insertion_order() {
        let cache = LruCache::new(3);
        cache.put(1, "one");
        cache.put(2, "two");
        cache.put(3, "three");
        cache.put(4, "four");
        cache.put(5, "five");

        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some("three"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn capacity_one_keeps_the_latest() {
        let cache = LruCache::new(1);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_insert_with_runs_at_most_once_per_cached_key() {
        let cache = LruCache::new(2);
        let (v, inserted) = cache.get_or_insert_with("k", || 7);
        assert_eq!((v, inserted), (7, true));
        let (v, inserted) = cache.get_or_insert_with("k", || unreachable!());
        assert_eq!((v, inserted), (7, false));
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = LruCache::new(4);
        for i in 0..100 {
            cache.put(i, i * 2);
            assert!(cache.len() <= 4);
        }
    }
}
