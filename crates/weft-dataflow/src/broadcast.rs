//! Broadcast channels.
//!
//! A [`DataflowBroadcast`] is the write side of a fan-out: each subscriber
//! obtains its own read view positioned at the current write head and
//! thereafter receives every written value exactly once, in write order.
//! Subscribers created after a write never see it.

use crate::channel::DataflowQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use weft_sched::{registry, SchedulerRef};

struct BroadcastInner<T> {
    /// Live read views. Writes and subscriber creation serialize on this
    /// lock, so a subscriber created concurrently with a write either
    /// receives the value or misses it - never a duplicate, never a loss
    /// for existing subscribers.
    subscribers: Mutex<Vec<DataflowQueue<T>>>,
    scheduler: SchedulerRef,
}

/// The write side of a fan-out channel.
///
/// Cheap to clone; all clones write to the same subscriber set.
pub struct DataflowBroadcast<T> {
    inner: Arc<BroadcastInner<T>>,
}

impl<T> Clone for DataflowBroadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for DataflowBroadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DataflowBroadcast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataflowBroadcast")
            .field("subscribers", &self.inner.subscribers.lock().len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> DataflowBroadcast<T> {
    /// Create a broadcast with no subscribers, using the process-default
    /// scheduler for subscriber handler execution.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(registry::default_scheduler())
    }

    /// Create a broadcast with an explicit handler scheduler.
    #[must_use]
    pub fn with_scheduler(scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(BroadcastInner {
                subscribers: Mutex::new(Vec::new()),
                scheduler,
            }),
        }
    }

    /// Create a read view positioned at the current write head.
    ///
    /// The view is an ordinary [`DataflowQueue`]: single-consumer FIFO
    /// semantics over this subscriber's copy of the stream.
    #[must_use]
    pub fn create_read_channel(&self) -> DataflowQueue<T> {
        let queue = DataflowQueue::with_scheduler(Arc::clone(&self.inner.scheduler));
        self.inner.subscribers.lock().push(queue.clone());
        queue
    }

    /// Append a value to every live read view. Never fails; with no
    /// subscribers the value is dropped.
    pub fn write(&self, value: T) {
        let value = Arc::new(value);
        let subscribers = self.inner.subscribers.lock();
        for queue in subscribers.iter() {
            queue.write_shared(Arc::clone(&value));
        }
    }

    /// Number of live read views.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}
