//! Running closures as dataflow tasks.
//!
//! A task is an independent worker whose result settles a single-assignment
//! variable. [`task`] gives every body its own thread, so bodies are free to
//! make blocking `read` calls without starving an executor; [`task_on`]
//! submits to an explicit scheduler instead.

use crate::variable::{run_catching, DataflowVariable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use weft_sched::{SchedulerExt, SchedulerRef};

static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Run `f` on a dedicated named thread; the returned variable settles with
/// its result, or with its panic as a fault.
pub fn task<T, F>(f: F) -> DataflowVariable<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let result = DataflowVariable::new();
    let cell = result.clone();
    let n = TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
    thread::Builder::new()
        .name(format!("weft-task-{n}"))
        .spawn(move || cell.settle(run_catching(f)))
        .expect("failed to spawn task thread");
    result
}

/// As [`task`], submitted to `scheduler` instead of a dedicated thread.
///
/// Bodies that block on unbound variables can exhaust a fixed pool; prefer
/// [`task`] (or a thread-per-task scheduler) for those.
pub fn task_on<T, F>(scheduler: &SchedulerRef, f: F) -> DataflowVariable<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let result = DataflowVariable::with_scheduler(Arc::clone(scheduler));
    let cell = result.clone();
    scheduler.submit_fn(move || cell.settle(run_catching(f)));
    result
}
