//! Single-assignment variables.
//!
//! A [`DataflowVariable`] is a one-shot cell: unbound at creation, it makes
//! at most one transition to a terminal state (a value or a fault) and stays
//! there for the rest of its life. Readers block until the transition;
//! handlers registered before the transition are submitted to the cell's
//! scheduler, in registration order, when it happens.
//!
//! # Example
//!
//! ```
//! use weft_dataflow::DataflowVariable;
//! use std::thread;
//!
//! let v = DataflowVariable::new();
//! let reader = v.clone();
//! let t = thread::spawn(move || *reader.read().unwrap());
//! v.bind(7).unwrap();
//! assert_eq!(t.join().unwrap(), 7);
//! ```

use crate::channel::DataflowReadChannel;
use crate::error::{fault_from_panic, DataflowError, Fault, Outcome};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_sched::{registry, SchedulerExt, SchedulerRef};

type BoundHandler<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum VarState<T> {
    Unbound { handlers: Vec<BoundHandler<T>> },
    Bound(Arc<T>),
    Failed(Fault),
}

struct VarInner<T> {
    state: Mutex<VarState<T>>,
    bound: Condvar,
    scheduler: SchedulerRef,
}

/// A thread-safe single-assignment variable.
///
/// Cheap to clone; all clones observe the same cell.
pub struct DataflowVariable<T> {
    inner: Arc<VarInner<T>>,
}

impl<T> Clone for DataflowVariable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for DataflowVariable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DataflowVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            VarState::Unbound { handlers } => format!("unbound ({} handlers)", handlers.len()),
            VarState::Bound(_) => "bound".to_string(),
            VarState::Failed(_) => "failed".to_string(),
        };
        f.debug_struct("DataflowVariable")
            .field("state", &state)
            .finish()
    }
}

/// Run a closure, converting a panic into a failed [`Outcome`].
pub(crate) fn run_catching<U, F>(f: F) -> Outcome<U>
where
    F: FnOnce() -> U,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(Arc::new(value)),
        Err(payload) => Err(fault_from_panic(payload)),
    }
}

impl<T: Send + Sync + 'static> DataflowVariable<T> {
    /// Create an unbound variable using the process-default scheduler for
    /// handler execution.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(registry::default_scheduler())
    }

    /// Create an unbound variable with an explicit handler scheduler.
    #[must_use]
    pub fn with_scheduler(scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(VarInner {
                state: Mutex::new(VarState::Unbound {
                    handlers: Vec::new(),
                }),
                bound: Condvar::new(),
                scheduler,
            }),
        }
    }

    pub(crate) fn scheduler(&self) -> &SchedulerRef {
        &self.inner.scheduler
    }

    pub(crate) fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Flip an unbound cell to the terminal state for `outcome`, returning
    /// the handlers that were waiting. Caller must hold the state lock and
    /// must have checked the cell is unbound.
    fn transition(state: &mut VarState<T>, outcome: &Outcome<T>) -> Vec<BoundHandler<T>> {
        let next = match outcome {
            Ok(value) => VarState::Bound(Arc::clone(value)),
            Err(fault) => VarState::Failed(Arc::clone(fault)),
        };
        match std::mem::replace(state, next) {
            VarState::Unbound { handlers } => handlers,
            _ => unreachable!("transition on a terminal cell"),
        }
    }

    /// Wake blocked readers and submit the snapshot of handlers in
    /// registration order. Never called under the state lock.
    fn finish(&self, handlers: Vec<BoundHandler<T>>, outcome: &Outcome<T>) {
        self.inner.bound.notify_all();
        for handler in handlers {
            let outcome = outcome.clone();
            self.inner.scheduler.submit_fn(move || handler(outcome));
        }
    }

    /// Bind a value.
    ///
    /// Rebinding an equal value is accepted silently; rebinding an unequal
    /// value, or binding after a fault, fails.
    ///
    /// # Errors
    ///
    /// [`DataflowError::AlreadyBound`] on an unequal rebind or when the cell
    /// is failed.
    pub fn bind(&self, value: T) -> Result<(), DataflowError>
    where
        T: PartialEq,
    {
        let outcome: Outcome<T> = Ok(Arc::new(value));
        let mut state = self.inner.state.lock();
        match &*state {
            VarState::Unbound { .. } => {
                let handlers = Self::transition(&mut state, &outcome);
                drop(state);
                self.finish(handlers, &outcome);
                Ok(())
            }
            VarState::Bound(old) => {
                let Ok(new) = &outcome else { unreachable!() };
                if **old == **new {
                    Ok(())
                } else {
                    Err(DataflowError::AlreadyBound)
                }
            }
            VarState::Failed(_) => Err(DataflowError::AlreadyBound),
        }
    }

    /// Bind a value, rejecting any rebind regardless of equality.
    ///
    /// # Errors
    ///
    /// [`DataflowError::AlreadyBound`] if the cell is already terminal.
    pub fn bind_unique(&self, value: T) -> Result<(), DataflowError> {
        let outcome: Outcome<T> = Ok(Arc::new(value));
        let mut state = self.inner.state.lock();
        if !matches!(&*state, VarState::Unbound { .. }) {
            return Err(DataflowError::AlreadyBound);
        }
        let handlers = Self::transition(&mut state, &outcome);
        drop(state);
        self.finish(handlers, &outcome);
        Ok(())
    }

    /// Bind a fault; subsequent reads re-raise it.
    ///
    /// # Errors
    ///
    /// [`DataflowError::AlreadyBound`] if the cell is already terminal.
    pub fn bind_error(&self, fault: Fault) -> Result<(), DataflowError> {
        let outcome: Outcome<T> = Err(fault);
        let mut state = self.inner.state.lock();
        if !matches!(&*state, VarState::Unbound { .. }) {
            return Err(DataflowError::AlreadyBound);
        }
        let handlers = Self::transition(&mut state, &outcome);
        drop(state);
        self.finish(handlers, &outcome);
        Ok(())
    }

    /// First-writer-wins completion used by combinators; later settles are
    /// silently ignored.
    pub(crate) fn settle(&self, outcome: Outcome<T>) {
        let mut state = self.inner.state.lock();
        if !matches!(&*state, VarState::Unbound { .. }) {
            return;
        }
        let handlers = Self::transition(&mut state, &outcome);
        drop(state);
        self.finish(handlers, &outcome);
    }

    /// Block until the cell is terminal; return the value or re-raise the
    /// fault.
    ///
    /// # Errors
    ///
    /// [`DataflowError::Failed`] when the cell holds a fault.
    pub fn read(&self) -> Result<Arc<T>, DataflowError> {
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                VarState::Bound(value) => return Ok(Arc::clone(value)),
                VarState::Failed(fault) => return Err(DataflowError::Failed(Arc::clone(fault))),
                VarState::Unbound { .. } => self.inner.bound.wait(&mut state),
            }
        }
    }

    /// As [`read`](Self::read) with a deadline; `Ok(None)` on expiry. The
    /// cell is not altered by an expired wait.
    ///
    /// # Errors
    ///
    /// [`DataflowError::Failed`] when the cell holds a fault.
    pub fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                VarState::Bound(value) => return Ok(Some(Arc::clone(value))),
                VarState::Failed(fault) => return Err(DataflowError::Failed(Arc::clone(fault))),
                VarState::Unbound { .. } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.inner.bound.wait_for(&mut state, remaining);
                }
            }
        }
    }

    /// The bound value, if any. Never blocks, never raises: a failed cell
    /// reports `None`.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<T>> {
        match &*self.inner.state.lock() {
            VarState::Bound(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Whether the cell is terminal (bound or failed). Non-authoritative: a
    /// concurrent bind may land right after the check.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !matches!(&*self.inner.state.lock(), VarState::Unbound { .. })
    }

    /// Register a one-shot handler.
    ///
    /// Registered before the transition, it is submitted to the scheduler at
    /// bind time, after all handlers registered earlier. Registered on a
    /// terminal cell, it is submitted immediately.
    pub fn when_bound<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let outcome = match &mut *state {
            VarState::Unbound { handlers } => {
                handlers.push(Box::new(handler));
                return;
            }
            VarState::Bound(value) => Ok(Arc::clone(value)),
            VarState::Failed(fault) => Err(Arc::clone(fault)),
        };
        drop(state);
        self.inner.scheduler.submit_fn(move || handler(outcome));
    }

    /// Derive a new variable from this one's eventual value.
    ///
    /// `f` runs on the scheduler once this cell is bound; its result (or its
    /// panic, as a fault) settles the returned variable. A fault in this
    /// cell skips `f` and is forwarded unchanged.
    pub fn then<U, F>(&self, f: F) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> U + Send + 'static,
    {
        let result = DataflowVariable::with_scheduler(Arc::clone(&self.inner.scheduler));
        let cell = result.clone();
        self.when_bound(move |outcome| match outcome {
            Ok(value) => cell.settle(run_catching(move || f(value))),
            Err(fault) => cell.settle(Err(fault)),
        });
        result
    }

    /// As [`then`](Self::then), with a fault handler.
    ///
    /// A fault in this cell is converted by `on_error` into the result
    /// value; a panic in `on_error` fails the result with the panic fault.
    pub fn then_or<U, F, G>(&self, f: F, on_error: G) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> U + Send + 'static,
        G: FnOnce(Fault) -> U + Send + 'static,
    {
        let result = DataflowVariable::with_scheduler(Arc::clone(&self.inner.scheduler));
        let cell = result.clone();
        self.when_bound(move |outcome| match outcome {
            Ok(value) => cell.settle(run_catching(move || f(value))),
            Err(fault) => cell.settle(run_catching(move || on_error(fault))),
        });
        result
    }

    /// Monadic composition: `f` returns another variable, and the returned
    /// variable settles to that variable's eventual outcome (flattening).
    pub fn chain<U, F>(&self, f: F) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> DataflowVariable<U> + Send + 'static,
    {
        let result = DataflowVariable::with_scheduler(Arc::clone(&self.inner.scheduler));
        let cell = result.clone();
        self.when_bound(move |outcome| match outcome {
            Ok(value) => match catch_unwind(AssertUnwindSafe(move || f(value))) {
                Ok(source) => {
                    let cell = cell.clone();
                    source.when_bound(move |outcome| cell.settle(outcome));
                }
                Err(payload) => cell.settle(Err(fault_from_panic(payload))),
            },
            Err(fault) => cell.settle(Err(fault)),
        });
        result
    }

    /// Type-erase into a read-channel handle for heterogeneous channel
    /// sets (e.g. select).
    #[must_use]
    pub fn as_channel(&self) -> Arc<dyn DataflowReadChannel<T>> {
        Arc::new(self.clone())
    }
}

impl<T: Send + Sync + 'static> DataflowReadChannel<T> for DataflowVariable<T> {
    fn read(&self) -> Result<Arc<T>, DataflowError> {
        DataflowVariable::read(self)
    }

    fn poll(&self) -> Option<Arc<T>> {
        DataflowVariable::poll(self)
    }

    fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        DataflowVariable::try_read(self, timeout)
    }

    fn when_bound(&self, handler: Box<dyn FnOnce(Outcome<T>) + Send>) {
        DataflowVariable::when_bound(self, handler);
    }

    fn whenever_bound(&self, handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>) {
        // A single-assignment cell produces at most one value; per-value
        // registration degenerates to the one-shot form.
        DataflowVariable::when_bound(self, move |outcome| handler(outcome));
    }

    fn has_value(&self) -> bool {
        self.is_bound()
    }

    fn is_single_assignment(&self) -> bool {
        true
    }
}
