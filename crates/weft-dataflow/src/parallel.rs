//! Parallel operations over finite sequences.
//!
//! Each element is evaluated as its own scheduled unit with a
//! single-assignment completion cell; results come back in element order
//! and per-element panics are collected into
//! [`DataflowError::Aggregate`] rather than dropped. All functions take an
//! explicit scheduler - nothing here touches the process default.

use crate::error::{fault_from_panic, DataflowError, Fault};
use crate::variable::DataflowVariable;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use weft_sched::{SchedulerExt, SchedulerRef};

/// Evaluate `f` over every element concurrently, collecting per-element
/// results in order.
fn evaluate<T, R, F>(
    scheduler: &SchedulerRef,
    items: &Arc<Vec<T>>,
    f: F,
) -> Result<Vec<R>, DataflowError>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    let count = items.len();
    let f = Arc::new(f);
    let slots: Arc<Mutex<Vec<Option<R>>>> =
        Arc::new(Mutex::new((0..count).map(|_| None).collect()));

    let cells: Vec<DataflowVariable<()>> = (0..count)
        .map(|index| {
            let cell = DataflowVariable::with_scheduler(Arc::clone(scheduler));
            let done = cell.clone();
            let items = Arc::clone(items);
            let f = Arc::clone(&f);
            let slots = Arc::clone(&slots);
            scheduler.submit_fn(move || {
                match catch_unwind(AssertUnwindSafe(|| f(&items[index]))) {
                    Ok(value) => {
                        slots.lock()[index] = Some(value);
                        done.settle(Ok(Arc::new(())));
                    }
                    Err(payload) => done.settle(Err(fault_from_panic(payload))),
                }
            });
            cell
        })
        .collect();

    let mut faults: Vec<Fault> = Vec::new();
    for cell in &cells {
        if let Err(err) = cell.read() {
            faults.push(match err {
                DataflowError::Failed(fault) => fault,
                other => Arc::new(other),
            });
        }
    }
    if !faults.is_empty() {
        return Err(DataflowError::Aggregate { faults });
    }

    let mut slots = slots.lock();
    Ok(slots
        .iter_mut()
        .map(|slot| slot.take().expect("completed element has a result"))
        .collect())
}

/// Apply `f` to every element concurrently; results in element order.
///
/// # Errors
///
/// [`DataflowError::Aggregate`] collecting every element that panicked.
pub fn parallel_map<T, U, F>(
    scheduler: &SchedulerRef,
    items: Vec<T>,
    f: F,
) -> Result<Vec<U>, DataflowError>
where
    T: Send + Sync + 'static,
    U: Send + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    let items = Arc::new(items);
    evaluate(scheduler, &items, f)
}

/// Keep the elements satisfying `pred`, evaluated concurrently; order
/// preserved.
///
/// # Errors
///
/// [`DataflowError::Aggregate`] collecting every element whose predicate
/// panicked.
pub fn parallel_filter<T, F>(
    scheduler: &SchedulerRef,
    items: Vec<T>,
    pred: F,
) -> Result<Vec<T>, DataflowError>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let items = Arc::new(items);
    let flags = evaluate(scheduler, &items, pred)?;
    Ok(items
        .iter()
        .zip(flags)
        .filter_map(|(item, keep)| keep.then(|| item.clone()))
        .collect())
}

/// The lowest-indexed element satisfying `pred`, or `None`. Every element
/// is evaluated; the index order makes the answer deterministic under
/// concurrency.
///
/// # Errors
///
/// [`DataflowError::Aggregate`] collecting every element whose predicate
/// panicked.
pub fn parallel_find<T, F>(
    scheduler: &SchedulerRef,
    items: Vec<T>,
    pred: F,
) -> Result<Option<T>, DataflowError>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let items = Arc::new(items);
    let flags = evaluate(scheduler, &items, pred)?;
    Ok(flags
        .iter()
        .position(|keep| *keep)
        .map(|index| items[index].clone()))
}

/// Whether every element satisfies `pred`.
///
/// # Errors
///
/// [`DataflowError::Aggregate`] collecting every element whose predicate
/// panicked.
pub fn parallel_all<T, F>(
    scheduler: &SchedulerRef,
    items: Vec<T>,
    pred: F,
) -> Result<bool, DataflowError>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let items = Arc::new(items);
    Ok(evaluate(scheduler, &items, pred)?.into_iter().all(|b| b))
}

/// Whether any element satisfies `pred`.
///
/// # Errors
///
/// [`DataflowError::Aggregate`] collecting every element whose predicate
/// panicked.
pub fn parallel_any<T, F>(
    scheduler: &SchedulerRef,
    items: Vec<T>,
    pred: F,
) -> Result<bool, DataflowError>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let items = Arc::new(items);
    Ok(evaluate(scheduler, &items, pred)?.into_iter().any(|b| b))
}
