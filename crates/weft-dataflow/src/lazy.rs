//! Lazily-initialized single-assignment variables.
//!
//! A [`LazyDataflowVariable`] carries a deferred initializer that runs
//! exactly once, on the scheduler, triggered by the first observation
//! (`read`, `try_read`, `when_bound`, `then`, `chain`). `poll` and
//! `has_value` never trigger it.

use crate::channel::DataflowReadChannel;
use crate::error::{fault_from_panic, DataflowError, Outcome};
use crate::variable::{run_catching, DataflowVariable};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use weft_sched::{registry, SchedulerExt, SchedulerRef};

enum Init<T> {
    Value(Box<dyn FnOnce() -> T + Send>),
    Flow(Box<dyn FnOnce() -> DataflowVariable<T> + Send>),
}

struct LazyInner<T> {
    cell: DataflowVariable<T>,
    init: Mutex<Option<Init<T>>>,
}

/// A single-assignment variable bound by a deferred, exactly-once
/// initializer.
pub struct LazyDataflowVariable<T> {
    inner: Arc<LazyInner<T>>,
}

impl<T> Clone for LazyDataflowVariable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for LazyDataflowVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDataflowVariable")
            .field("initialized", &self.inner.init.lock().is_none())
            .field("cell", &self.inner.cell)
            .finish()
    }
}

impl<T: Send + Sync + 'static> LazyDataflowVariable<T> {
    /// Create a lazy variable whose initializer produces the value
    /// directly.
    #[must_use]
    pub fn new<F>(init: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::with_scheduler(registry::default_scheduler(), init)
    }

    /// As [`new`](Self::new) with an explicit scheduler.
    #[must_use]
    pub fn with_scheduler<F>(scheduler: SchedulerRef, init: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::build(scheduler, Init::Value(Box::new(init)))
    }

    /// Create a lazy variable whose initializer returns another variable;
    /// the cell settles to that variable's eventual outcome (flattening).
    #[must_use]
    pub fn flattening<F>(init: F) -> Self
    where
        F: FnOnce() -> DataflowVariable<T> + Send + 'static,
    {
        Self::flattening_with_scheduler(registry::default_scheduler(), init)
    }

    /// As [`flattening`](Self::flattening) with an explicit scheduler.
    #[must_use]
    pub fn flattening_with_scheduler<F>(scheduler: SchedulerRef, init: F) -> Self
    where
        F: FnOnce() -> DataflowVariable<T> + Send + 'static,
    {
        Self::build(scheduler, Init::Flow(Box::new(init)))
    }

    fn build(scheduler: SchedulerRef, init: Init<T>) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                cell: DataflowVariable::with_scheduler(scheduler),
                init: Mutex::new(Some(init)),
            }),
        }
    }

    /// Take the initializer, if still present, and run it on the
    /// scheduler. A panicking initializer fails the cell with its panic
    /// fault.
    fn force(&self) {
        let Some(init) = self.inner.init.lock().take() else {
            return;
        };
        let cell = self.inner.cell.clone();
        self.inner.cell.scheduler().submit_fn(move || match init {
            Init::Value(f) => cell.settle(run_catching(f)),
            Init::Flow(f) => match catch_unwind(AssertUnwindSafe(f)) {
                Ok(source) => {
                    let cell = cell.clone();
                    source.when_bound(move |outcome| cell.settle(outcome));
                }
                Err(payload) => cell.settle(Err(fault_from_panic(payload))),
            },
        });
    }

    /// Trigger the initializer if needed and block for the value.
    ///
    /// # Errors
    ///
    /// [`DataflowError::Failed`] when the initializer failed.
    pub fn read(&self) -> Result<Arc<T>, DataflowError> {
        self.force();
        self.inner.cell.read()
    }

    /// Trigger the initializer if needed; `Ok(None)` on expiry.
    ///
    /// # Errors
    ///
    /// [`DataflowError::Failed`] when the initializer failed.
    pub fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        self.force();
        self.inner.cell.try_read(timeout)
    }

    /// The initialized value, if already available. Does not trigger the
    /// initializer.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<T>> {
        self.inner.cell.poll()
    }

    /// Whether the cell is terminal. Does not trigger the initializer.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.cell.is_bound()
    }

    /// Trigger the initializer if needed and register a one-shot handler.
    pub fn when_bound<F>(&self, handler: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.force();
        self.inner.cell.when_bound(handler);
    }

    /// Trigger the initializer if needed and derive a new variable; see
    /// [`DataflowVariable::then`].
    pub fn then<U, F>(&self, f: F) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> U + Send + 'static,
    {
        self.force();
        self.inner.cell.then(f)
    }

    /// Trigger the initializer if needed and compose; see
    /// [`DataflowVariable::chain`].
    pub fn chain<U, F>(&self, f: F) -> DataflowVariable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> DataflowVariable<U> + Send + 'static,
    {
        self.force();
        self.inner.cell.chain(f)
    }

    /// Type-erase into a read-channel handle.
    #[must_use]
    pub fn as_channel(&self) -> Arc<dyn DataflowReadChannel<T>> {
        Arc::new(self.clone())
    }
}

impl<T: Send + Sync + 'static> DataflowReadChannel<T> for LazyDataflowVariable<T> {
    fn read(&self) -> Result<Arc<T>, DataflowError> {
        LazyDataflowVariable::read(self)
    }

    fn poll(&self) -> Option<Arc<T>> {
        LazyDataflowVariable::poll(self)
    }

    fn try_read(&self, timeout: Duration) -> Result<Option<Arc<T>>, DataflowError> {
        LazyDataflowVariable::try_read(self, timeout)
    }

    fn when_bound(&self, handler: Box<dyn FnOnce(Outcome<T>) + Send>) {
        LazyDataflowVariable::when_bound(self, handler);
    }

    fn whenever_bound(&self, handler: Arc<dyn Fn(Outcome<T>) + Send + Sync>) {
        LazyDataflowVariable::when_bound(self, move |outcome| handler(outcome));
    }

    fn has_value(&self) -> bool {
        self.is_bound()
    }

    fn is_single_assignment(&self) -> bool {
        true
    }
}
