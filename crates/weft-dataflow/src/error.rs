//! Error types for the dataflow core.
//!
//! Failures travel through dataflow graphs as shared [`Fault`] values: a
//! single error bound into a variable can be observed by any number of
//! readers and handlers, so the payload is reference-counted rather than
//! owned.

use std::any::Any;
use std::sync::Arc;

/// A shared, value-carrying error payload.
///
/// Bound into a variable by `bind_error`, re-raised by `read`, and forwarded
/// through `then` / `when_all_bound` chains.
pub type Fault = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// What a registered handler receives once a value (or failure) is
/// available.
pub type Outcome<T> = Result<Arc<T>, Fault>;

/// Errors surfaced by dataflow operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataflowError {
    /// A second bind was attempted on a terminal variable, or a rebind
    /// carried a value unequal to the bound one.
    #[error("variable is already bound")]
    AlreadyBound,

    /// The observed cell is in the failed state; the original fault is
    /// carried along.
    #[error("dataflow value failed: {0}")]
    Failed(Fault),

    /// One or more elements of a parallel collection operation failed.
    /// Element faults are collected, not dropped.
    #[error("{} parallel task(s) failed", faults.len())]
    Aggregate {
        /// The individual element faults, in element order.
        faults: Vec<Fault>,
    },
}

/// Wrap a concrete error into a shareable [`Fault`].
pub fn fault<E>(err: E) -> Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// The fault manufactured from a caught panic in a handler, task body, or
/// lazy initializer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("task panicked: {message}")]
pub struct TaskPanic {
    /// The stringified panic payload.
    pub message: String,
}

/// Convert a `catch_unwind` payload into a [`Fault`].
pub(crate) fn fault_from_panic(payload: Box<dyn Any + Send>) -> Fault {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    };
    Arc::new(TaskPanic { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_messages() {
        let f = fault_from_panic(Box::new("static str"));
        assert_eq!(f.to_string(), "task panicked: static str");

        let f = fault_from_panic(Box::new(String::from("owned")));
        assert_eq!(f.to_string(), "task panicked: owned");

        let f = fault_from_panic(Box::new(17_u32));
        assert_eq!(f.to_string(), "task panicked: opaque panic payload");
    }

    #[test]
    fn aggregate_display_counts_faults() {
        let err = DataflowError::Aggregate {
            faults: vec![
                fault(TaskPanic {
                    message: "a".into(),
                }),
                fault(TaskPanic {
                    message: "b".into(),
                }),
            ],
        };
        assert_eq!(err.to_string(), "2 parallel task(s) failed");
    }
}
