//! LRU-protected memoization of pure computations.

use crate::error::DataflowError;
use crate::lru::LruCache;
use crate::variable::{run_catching, DataflowVariable};
use std::hash::Hash;
use std::sync::Arc;
use weft_sched::{registry, SchedulerRef};

/// A thread-safe memoizer over a bounded LRU protection cache.
///
/// The cache stores one single-assignment cell per key, so a computation
/// runs at most once per cached key even under concurrent lookups: the
/// caller that installs the cell computes, everyone else blocks on the same
/// cell. Evicted keys are recomputed on a later lookup.
pub struct Memo<K, V> {
    cache: LruCache<K, DataflowVariable<V>>,
    scheduler: SchedulerRef,
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone,
    V: Send + Sync + 'static,
{
    /// Create a memoizer protecting at most `capacity` results.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_scheduler(capacity, registry::default_scheduler())
    }

    /// As [`new`](Self::new) with an explicit scheduler for the cached
    /// cells.
    #[must_use]
    pub fn with_scheduler(capacity: usize, scheduler: SchedulerRef) -> Self {
        Self {
            cache: LruCache::new(capacity),
            scheduler,
        }
    }

    /// Return the memoized value for `key`, computing it with `compute` on
    /// a miss. `compute` runs on the calling thread; concurrent callers for
    /// the same key block until it finishes. A panicking `compute` fails
    /// the cached cell, and every waiter observes the same fault.
    ///
    /// # Errors
    ///
    /// [`DataflowError::Failed`] when the computation for this key
    /// panicked.
    pub fn fetch<F>(&self, key: K, compute: F) -> Result<Arc<V>, DataflowError>
    where
        F: FnOnce(&K) -> V,
    {
        let (cell, fresh) = self
            .cache
            .get_or_insert_with(key.clone(), || {
                DataflowVariable::with_scheduler(Arc::clone(&self.scheduler))
            });
        if fresh {
            tracing::trace!("memo miss, computing");
            cell.settle(run_catching(|| compute(&key)));
        } else {
            tracing::trace!("memo hit");
        }
        cell.read()
    }

    /// Number of protected entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The protection capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }
}
