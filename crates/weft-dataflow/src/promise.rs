//! Combinators over groups of single-assignment variables.

use crate::error::Fault;
use crate::variable::{run_catching, DataflowVariable};
use parking_lot::Mutex;
use std::sync::Arc;
use weft_sched::{registry, SchedulerRef};

type Combiner<T, U> = Box<dyn FnOnce(Vec<Arc<T>>) -> U + Send>;

struct Join<T, U> {
    slots: Vec<Option<Arc<T>>>,
    remaining: usize,
    combiner: Option<Combiner<T, U>>,
}

/// Bind a fresh variable to `combiner(values)` once every input is bound.
///
/// Values are passed in input order. The first observed fault settles the
/// result to failed and the combiner never runs; outcomes arriving after
/// the result settled are ignored (first writer wins on the
/// single-assignment result). A panicking combiner fails the result with
/// its panic fault.
pub fn when_all_bound<T, U, F>(
    inputs: &[DataflowVariable<T>],
    combiner: F,
) -> DataflowVariable<U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(Vec<Arc<T>>) -> U + Send + 'static,
{
    when_all_bound_with_scheduler(registry::default_scheduler(), inputs, combiner)
}

/// As [`when_all_bound`] with an explicit scheduler for the result cell.
pub fn when_all_bound_with_scheduler<T, U, F>(
    scheduler: SchedulerRef,
    inputs: &[DataflowVariable<T>],
    combiner: F,
) -> DataflowVariable<U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(Vec<Arc<T>>) -> U + Send + 'static,
{
    let result = DataflowVariable::with_scheduler(scheduler);
    let count = inputs.len();

    if count == 0 {
        result.settle(run_catching(move || combiner(Vec::new())));
        return result;
    }

    let join = Arc::new(Mutex::new(Join {
        slots: (0..count).map(|_| None).collect(),
        remaining: count,
        combiner: Some(Box::new(combiner) as Combiner<T, U>),
    }));

    for (index, input) in inputs.iter().enumerate() {
        let join = Arc::clone(&join);
        let result = result.clone();
        input.when_bound(move |outcome| match outcome {
            Ok(value) => {
                let ready = {
                    let mut join = join.lock();
                    if join.slots[index].is_none() {
                        join.slots[index] = Some(value);
                        join.remaining -= 1;
                    }
                    if join.remaining == 0 {
                        join.combiner.take().map(|combiner| {
                            let values = join
                                .slots
                                .iter_mut()
                                .map(|slot| slot.take().expect("all inputs are bound"))
                                .collect::<Vec<_>>();
                            (combiner, values)
                        })
                    } else {
                        None
                    }
                };
                if let Some((combiner, values)) = ready {
                    result.settle(run_catching(move || combiner(values)));
                }
            }
            Err(fault) => result.settle(Err::<Arc<U>, Fault>(fault)),
        });
    }

    result
}
