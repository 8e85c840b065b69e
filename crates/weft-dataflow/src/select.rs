//! Non-deterministic selection over a heterogeneous channel set.
//!
//! A [`Select`] composes a fixed set of read channels into a single
//! "first ready wins" operation. A pick scans the channels from a starting
//! position (uniformly random by default, so no channel is structurally
//! starved) and takes the first available value; when nothing is ready the
//! request parks until a channel notifies.
//!
//! Single-assignment channels are special-cased: once one has been picked
//! it is disabled for the lifetime of the select, so its lone value is
//! never reported twice.

use crate::channel::DataflowReadChannel;
use crate::error::DataflowError;
use crate::variable::DataflowVariable;
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use weft_sched::{registry, SchedulerRef};

/// The channel index and value produced by one pick.
#[derive(Debug)]
pub struct SelectResult<T> {
    /// Index of the channel that produced the value.
    pub index: usize,
    /// The value taken from that channel.
    pub value: Arc<T>,
}

impl<T> Clone for SelectResult<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            value: Arc::clone(&self.value),
        }
    }
}

/// A parked pick: the guard set it accepts and the one-shot slot its result
/// lands in.
struct SelectRequest<T> {
    mask: Option<Vec<bool>>,
    slot: DataflowVariable<SelectResult<T>>,
}

impl<T: Send + Sync + 'static> SelectRequest<T> {
    fn admits(&self, index: usize) -> bool {
        match &self.mask {
            Some(mask) => mask.get(index).copied().unwrap_or(false),
            None => true,
        }
    }
}

struct SelectState<T> {
    /// Single-assignment channels already consumed by a pick.
    disabled: Vec<bool>,
    /// Parked requests, matched in registration order.
    pending: Vec<SelectRequest<T>>,
}

struct SelectInner<T> {
    channels: Vec<Arc<dyn DataflowReadChannel<T>>>,
    state: Mutex<SelectState<T>>,
    scheduler: SchedulerRef,
}

impl<T: Send + Sync + 'static> SelectInner<T> {
    /// Called from channel taps when a value becomes available on
    /// `index`. Runs on the scheduler, never under any channel lock.
    fn bound_notification(&self, index: usize) {
        let mut state = self.state.lock();
        if state.disabled[index] {
            return;
        }
        // Find a parked request willing to take this channel before
        // polling: a poll consumes a queue value, and there must be a taker.
        let Some(position) = state.pending.iter().position(|req| req.admits(index)) else {
            return;
        };
        if let Some(value) = self.channels[index].poll() {
            let request = state.pending.remove(position);
            if self.channels[index].is_single_assignment() {
                state.disabled[index] = true;
            }
            drop(state);
            tracing::trace!(index, "select matched a parked request");
            request.slot.settle(Ok(Arc::new(SelectResult { index, value })));
        }
    }
}

/// A composite read over a fixed, ordered set of channels.
pub struct Select<T> {
    inner: Arc<SelectInner<T>>,
}

impl<T> Clone for Select<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Select<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Select")
            .field("channels", &self.inner.channels.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Select<T> {
    /// Compose the given channels, using the process-default scheduler for
    /// result-slot handlers.
    #[must_use]
    pub fn new(channels: Vec<Arc<dyn DataflowReadChannel<T>>>) -> Self {
        Self::with_scheduler(channels, registry::default_scheduler())
    }

    /// As [`new`](Self::new) with an explicit scheduler.
    ///
    /// Registers a per-value notification on every channel. The callbacks
    /// hold only a weak reference back to the select, so dropping the last
    /// [`Select`] handle turns them into no-ops.
    #[must_use]
    pub fn with_scheduler(
        channels: Vec<Arc<dyn DataflowReadChannel<T>>>,
        scheduler: SchedulerRef,
    ) -> Self {
        assert!(!channels.is_empty(), "select requires at least one channel");
        let count = channels.len();
        let inner = Arc::new(SelectInner {
            channels,
            state: Mutex::new(SelectState {
                disabled: vec![false; count],
                pending: Vec::new(),
            }),
            scheduler,
        });

        for (index, channel) in inner.channels.iter().enumerate() {
            let back: Weak<SelectInner<T>> = Arc::downgrade(&inner);
            channel.whenever_bound(Arc::new(move |_outcome| {
                if let Some(select) = back.upgrade() {
                    select.bound_notification(index);
                }
            }));
        }

        Self { inner }
    }

    /// Number of composed channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Pick the first ready channel, scanning from a uniformly random
    /// start position; block until one is ready.
    ///
    /// # Errors
    ///
    /// Propagates a failure of the underlying result slot; picks themselves
    /// never fail.
    pub fn select(&self) -> Result<SelectResult<T>, DataflowError> {
        self.finish(self.submit_request(None, None))
    }

    /// Pick scanning from `start` (round-robin style bias control).
    ///
    /// # Errors
    ///
    /// As [`select`](Self::select).
    pub fn select_from(&self, start: usize) -> Result<SelectResult<T>, DataflowError> {
        self.finish(self.submit_request(Some(start), None))
    }

    /// Pick restricted to the channels whose mask entry is `true`, scanning
    /// from a random start.
    ///
    /// # Errors
    ///
    /// As [`select`](Self::select).
    pub fn select_masked(&self, mask: &[bool]) -> Result<SelectResult<T>, DataflowError> {
        self.finish(self.submit_request(None, Some(mask.to_vec())))
    }

    /// Pick restricted to `mask`, scanning from `start`.
    ///
    /// # Errors
    ///
    /// As [`select`](Self::select).
    pub fn select_masked_from(
        &self,
        start: usize,
        mask: &[bool],
    ) -> Result<SelectResult<T>, DataflowError> {
        self.finish(self.submit_request(Some(start), Some(mask.to_vec())))
    }

    /// Bounded-wait pick; `Ok(None)` on expiry. An expired request is
    /// withdrawn so a later value is not claimed for a reader that has
    /// given up.
    ///
    /// # Errors
    ///
    /// As [`select`](Self::select).
    pub fn try_select(&self, timeout: Duration) -> Result<Option<SelectResult<T>>, DataflowError> {
        let slot = self.submit_request(None, None);
        if let Some(result) = slot.try_read(timeout)? {
            return Ok(Some((*result).clone()));
        }

        let mut state = self.inner.state.lock();
        state.pending.retain(|req| !req.slot.same_cell(&slot));
        drop(state);

        // A value may have been matched between the expiry and the
        // withdrawal.
        match slot.poll() {
            Some(result) => Ok(Some((*result).clone())),
            None => Ok(None),
        }
    }

    /// Asynchronous pick: returns the one-shot slot the result will land
    /// in, for composition with `then` / `when_bound`.
    #[must_use]
    pub fn select_to_promise(
        &self,
        start: Option<usize>,
        mask: Option<&[bool]>,
    ) -> DataflowVariable<SelectResult<T>> {
        self.submit_request(start, mask.map(<[bool]>::to_vec))
    }

    fn finish(
        &self,
        slot: DataflowVariable<SelectResult<T>>,
    ) -> Result<SelectResult<T>, DataflowError> {
        Ok((*slot.read()?).clone())
    }

    /// The pick protocol: scan `(start + k) % n` for the first admitted,
    /// enabled channel with an available value; otherwise park the request.
    fn submit_request(
        &self,
        start: Option<usize>,
        mask: Option<Vec<bool>>,
    ) -> DataflowVariable<SelectResult<T>> {
        let count = self.inner.channels.len();
        if let Some(mask) = &mask {
            assert_eq!(
                mask.len(),
                count,
                "mask length must equal the channel count"
            );
        }

        let slot = DataflowVariable::with_scheduler(Arc::clone(&self.inner.scheduler));
        let request = SelectRequest {
            mask,
            slot: slot.clone(),
        };
        let start = start.unwrap_or_else(|| rand::thread_rng().gen_range(0..count));

        let mut state = self.inner.state.lock();
        for k in 0..count {
            let index = (start + k) % count;
            if request.admits(index) && !state.disabled[index] {
                if let Some(value) = self.inner.channels[index].poll() {
                    if self.inner.channels[index].is_single_assignment() {
                        state.disabled[index] = true;
                    }
                    drop(state);
                    tracing::trace!(index, "select picked synchronously");
                    slot.settle(Ok(Arc::new(SelectResult { index, value })));
                    return slot;
                }
            }
        }
        state.pending.push(request);
        drop(state);
        tracing::trace!("select request parked");
        slot
    }
}
