//! Point-to-point channels and the read-channel contract.
//!
//! A [`DataflowQueue`] is a FIFO channel for any number of producers and
//! consumers: every written value is delivered to exactly one ordinary
//! consumer, in write order. Taps registered with
//! [`whenever_bound`](DataflowQueue::whenever_bound) observe every value
//! alongside the consumers without competing with them.

use crate::error::{DataflowError, Outcome};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_sched::{registry, SchedulerExt, SchedulerRef};

// ============================================================================
// Read-Channel Contract
// ============================================================================

/// The read side shared by every dataflow channel kind.
///
/// Implementations must keep `poll` non-blocking and free of callbacks into
/// select machinery while any internal lock is held: select holds its own
/// lock while polling, and channel locks are leaves under it.
pub trait DataflowReadChannel<T>: Send + Sync {
    /// Block until a value is available and consume it (for single-
    /// assignment channels, observe it).
    fn read(&self) -> Result<Arc<T>, DataflowError>;

    /// Take an available value without blocking. Never raises.
    fn poll(&self) -> Option<Arc<T>>;

    /// As [`read`](Self::read) with a deadline; `Ok(None)` on expiry.
    fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError>;

    /// Register a one-shot handler for the next available value.
    fn when_bound(&self, handler: Box<dyn FnOnce(Outcome<T>) + Send>);

    /// Register a handler invoked for each value that becomes available
    /// after registration.
    fn whenever_bound(&self, handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>);

    /// Non-authoritative hint that a `read` would currently not block.
    fn has_value(&self) -> bool;

    /// Whether this channel yields at most one value over its lifetime.
    /// Select uses this to avoid picking such a channel twice.
    fn is_single_assignment(&self) -> bool {
        false
    }
}

// ============================================================================
// Taps
// ============================================================================

/// A per-handler feed. Values are appended in write order under the queue
/// lock; at most one drain job runs at a time, so the handler sees values
/// sequentially and in order.
struct Tap<T> {
    feed: Mutex<TapFeed<T>>,
    handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>,
}

struct TapFeed<T> {
    pending: VecDeque<Arc<T>>,
    draining: bool,
}

impl<T: Send + Sync + 'static> Tap<T> {
    fn offer(self: &Arc<Self>, value: Arc<T>, scheduler: &SchedulerRef) {
        let mut feed = self.feed.lock();
        feed.pending.push_back(value);
        if !feed.draining {
            feed.draining = true;
            drop(feed);
            let tap = Arc::clone(self);
            scheduler.submit_fn(move || tap.drain());
        }
    }

    fn drain(self: Arc<Self>) {
        loop {
            let value = {
                let mut feed = self.feed.lock();
                match feed.pending.pop_front() {
                    Some(value) => value,
                    None => {
                        feed.draining = false;
                        return;
                    }
                }
            };
            (self.handler)(Ok(value));
        }
    }
}

// ============================================================================
// Point-to-Point Queue
// ============================================================================

type OneShot<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

struct QueueState<T> {
    values: VecDeque<Arc<T>>,
    /// Waiting asynchronous consumers. Non-empty only while `values` is
    /// empty: a registration finding a queued value consumes it on the spot.
    one_shots: VecDeque<OneShot<T>>,
    taps: Vec<Arc<Tap<T>>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    readable: Condvar,
    writable: Condvar,
    capacity: Option<usize>,
    scheduler: SchedulerRef,
}

/// A FIFO many-producers / many-consumers channel.
///
/// Cheap to clone; all clones observe the same channel.
pub struct DataflowQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for DataflowQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for DataflowQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DataflowQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DataflowQueue")
            .field("len", &state.values.len())
            .field("taps", &state.taps.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl<T: Send + Sync + 'static> DataflowQueue<T> {
    /// Create an unbounded queue using the process-default scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(registry::default_scheduler())
    }

    /// Create an unbounded queue with an explicit handler scheduler.
    #[must_use]
    pub fn with_scheduler(scheduler: SchedulerRef) -> Self {
        Self::build(None, scheduler)
    }

    /// Create a bounded queue: writers block while `capacity` values are
    /// queued.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::bounded_with_scheduler(capacity, registry::default_scheduler())
    }

    /// Bounded variant with an explicit handler scheduler.
    #[must_use]
    pub fn bounded_with_scheduler(capacity: usize, scheduler: SchedulerRef) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self::build(Some(capacity), scheduler)
    }

    fn build(capacity: Option<usize>, scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    values: VecDeque::new(),
                    one_shots: VecDeque::new(),
                    taps: Vec::new(),
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
                capacity,
                scheduler,
            }),
        }
    }

    /// Write a value into the queue.
    ///
    /// Non-blocking when unbounded; blocks while the queue is full when
    /// bounded. The value is offered to every tap, then either handed to a
    /// waiting one-shot consumer or enqueued for readers.
    pub fn write(&self, value: T) {
        self.write_shared(Arc::new(value));
    }

    pub(crate) fn write_shared(&self, value: Arc<T>) {
        let mut state = self.inner.state.lock();
        if let Some(capacity) = self.inner.capacity {
            while state.values.len() >= capacity && state.one_shots.is_empty() {
                self.inner.writable.wait(&mut state);
            }
        }

        for tap in &state.taps {
            tap.offer(Arc::clone(&value), &self.inner.scheduler);
        }

        if let Some(handler) = state.one_shots.pop_front() {
            drop(state);
            let outcome = Ok(value);
            self.inner.scheduler.submit_fn(move || handler(outcome));
        } else {
            state.values.push_back(value);
            drop(state);
            self.inner.readable.notify_one();
        }
    }

    /// Block until a value is available and take it.
    ///
    /// # Errors
    ///
    /// Infallible for queues; the `Result` matches the read-channel
    /// contract.
    pub fn read(&self) -> Result<Arc<T>, DataflowError> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = state.values.pop_front() {
                drop(state);
                self.inner.writable.notify_one();
                return Ok(value);
            }
            self.inner.readable.wait(&mut state);
        }
    }

    /// Take an available value without blocking.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<T>> {
        let mut state = self.inner.state.lock();
        let value = state.values.pop_front();
        drop(state);
        if value.is_some() {
            self.inner.writable.notify_one();
        }
        value
    }

    /// As [`read`](Self::read) with a deadline; `Ok(None)` on expiry.
    ///
    /// # Errors
    ///
    /// Infallible for queues; the `Result` matches the read-channel
    /// contract.
    pub fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = state.values.pop_front() {
                drop(state);
                self.inner.writable.notify_one();
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.inner.readable.wait_for(&mut state, remaining);
        }
    }

    /// Register a one-shot asynchronous consumer: it takes the next
    /// available value exactly like a reader, via the scheduler.
    pub fn when_bound<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if let Some(value) = state.values.pop_front() {
            drop(state);
            self.inner.writable.notify_one();
            let outcome = Ok(value);
            self.inner.scheduler.submit_fn(move || handler(outcome));
        } else {
            state.one_shots.push_back(Box::new(handler));
        }
    }

    /// Register a tap: the handler observes every value written after
    /// registration, in write order, without competing with ordinary
    /// consumers.
    pub fn whenever_bound(&self, handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>) {
        let tap = Arc::new(Tap {
            feed: Mutex::new(TapFeed {
                pending: VecDeque::new(),
                draining: false,
            }),
            handler,
        });
        self.inner.state.lock().taps.push(tap);
    }

    /// Number of queued values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().values.len()
    }

    /// Whether no values are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type-erase into a read-channel handle for heterogeneous channel
    /// sets (e.g. select).
    #[must_use]
    pub fn as_channel(&self) -> Arc<dyn DataflowReadChannel<T>> {
        Arc::new(self.clone())
    }
}

impl<T: Send + Sync + 'static> DataflowReadChannel<T> for DataflowQueue<T> {
    fn read(&self) -> Result<Arc<T>, DataflowError> {
        DataflowQueue::read(self)
    }

    fn poll(&self) -> Option<Arc<T>> {
        DataflowQueue::poll(self)
    }

    fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        DataflowQueue::try_read(self, timeout)
    }

    fn when_bound(&self, handler: Box<dyn FnOnce(Outcome<T>) + Send>) {
        DataflowQueue::when_bound(self, handler);
    }

    fn whenever_bound(&self, handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>) {
        DataflowQueue::whenever_bound(self, handler);
    }

    fn has_value(&self) -> bool {
        !self.is_empty()
    }
}
