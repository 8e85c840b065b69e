//! Task schedulers for the weft dataflow core.
//!
//! The dataflow primitives never run user handlers inline on the thread that
//! bound a value; everything goes through a [`Scheduler`]. This crate
//! provides:
//!
//! - **[`Scheduler`]** - the minimal submit-a-thunk contract the core
//!   consumes
//! - **[`ThreadPool`]** - a work-stealing pool for handler and combinator
//!   execution
//! - **[`ThreadPerTask`]** - one thread per submission, for workloads whose
//!   tasks block on dataflow reads
//! - **[`registry`]** - a process-wide default scheduler with explicit
//!   `init` / `shutdown` and a lazy fallback
//!
//! # Example
//!
//! ```
//! use weft_sched::{Scheduler, SchedulerExt, ThreadPool, PoolConfig};
//! use std::sync::mpsc;
//!
//! let pool = ThreadPool::with_config(PoolConfig { workers: 2, ..Default::default() });
//! let (tx, rx) = mpsc::channel();
//! pool.submit_fn(move || tx.send(21 * 2).unwrap());
//! assert_eq!(rx.recv().unwrap(), 42);
//! pool.shutdown();
//! ```

#![warn(missing_docs)]

use crossbeam::deque::{Injector, Stealer, Worker as WorkerDeque};
use crossbeam_utils::Backoff;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// ============================================================================
// Scheduler Contract
// ============================================================================

/// A unit of scheduled work.
pub type Job = Box<dyn FnOnce() + Send>;

/// The executor contract consumed by the dataflow primitives.
///
/// Implementations schedule the thunk for eventual execution. There is no
/// ordering guarantee between distinct submissions, and `submit` is
/// reentrant: a running thunk may submit further work.
pub trait Scheduler: Send + Sync {
    /// Schedule a thunk for execution.
    fn submit(&self, job: Job);
}

/// A shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Convenience extensions over [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    /// Submit a closure without boxing it at the call site.
    fn submit_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(f));
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn submit(&self, job: Job) {
        (**self).submit(job);
    }
}

// ============================================================================
// Pool Configuration and Stats
// ============================================================================

/// Configuration for [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Stack size for worker threads.
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus(),
            stack_size: 2 * 1024 * 1024, // 2 MiB
        }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Counters exposed by [`ThreadPool::stats`].
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total jobs submitted.
    pub submitted: u64,
    /// Total jobs completed (including panicked jobs).
    pub completed: u64,
    /// Number of successful steals from sibling workers.
    pub steals: u64,
    /// Number of scan rounds that found no work anywhere.
    pub steal_failures: u64,
}

// ============================================================================
// Work-Stealing Thread Pool
// ============================================================================

/// A work-stealing thread pool.
///
/// Each worker owns a local FIFO deque and falls back to the shared injector
/// and then to stealing from siblings. Panicking jobs are caught so a worker
/// is never lost to user code.
pub struct ThreadPool {
    config: PoolConfig,
    injector: Arc<Injector<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<RwLock<PoolStats>>,
    shutdown: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Create a pool with `workers` threads and default stack size.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_config(PoolConfig {
            workers,
            ..Default::default()
        })
    }

    /// Create a pool from an explicit configuration.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(RwLock::new(PoolStats::default()));

        let mut local_queues = Vec::with_capacity(config.workers);
        let mut stealers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let deque = WorkerDeque::new_fifo();
            stealers.push(deque.stealer());
            local_queues.push(deque);
        }
        let stealers = Arc::new(stealers);

        let mut workers = Vec::with_capacity(config.workers);
        for (id, local) in local_queues.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let stealers = Arc::clone(&stealers);
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);

            let handle = thread::Builder::new()
                .name(format!("weft-worker-{id}"))
                .stack_size(config.stack_size)
                .spawn(move || worker_loop(id, &local, &injector, &stealers, &shutdown, &stats))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        tracing::debug!(workers = config.workers, "thread pool started");

        Self {
            config,
            injector,
            workers,
            stats,
            shutdown,
        }
    }

    /// Get the number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Snapshot the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.read().clone()
    }

    /// Stop accepting progress and join all workers.
    ///
    /// Jobs still queued when the flag is observed are dropped.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in std::mem::take(&mut self.workers) {
            let _ = worker.join();
        }
        tracing::debug!("thread pool shut down");
    }
}

impl Scheduler for ThreadPool {
    fn submit(&self, job: Job) {
        self.stats.write().submitted += 1;
        self.injector.push(job);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn worker_loop(
    id: usize,
    local: &WorkerDeque<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
    stats: &RwLock<PoolStats>,
) {
    let backoff = Backoff::new();

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if let Some(job) = local.pop() {
            run_job(job, stats);
            backoff.reset();
            continue;
        }

        if let crossbeam::deque::Steal::Success(job) = injector.steal_batch_and_pop(local) {
            run_job(job, stats);
            backoff.reset();
            continue;
        }

        let mut stolen = false;
        for (i, stealer) in stealers.iter().enumerate() {
            if i == id {
                continue;
            }
            if let crossbeam::deque::Steal::Success(job) = stealer.steal() {
                stats.write().steals += 1;
                run_job(job, stats);
                stolen = true;
                break;
            }
        }

        if stolen {
            backoff.reset();
        } else {
            stats.write().steal_failures += 1;
            backoff.snooze();
        }
    }
}

fn run_job(job: Job, stats: &RwLock<PoolStats>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
    if outcome.is_err() {
        tracing::debug!("scheduled job panicked");
    }
    stats.write().completed += 1;
}

// ============================================================================
// Thread-Per-Task Scheduler
// ============================================================================

/// A scheduler that runs every submission on its own named thread.
///
/// Trivially deadlock-free: a submission that blocks on a dataflow read can
/// never starve other submissions of execution resources. Suited to
/// long-lived task bodies; for short handlers prefer [`ThreadPool`].
#[derive(Debug, Default)]
pub struct ThreadPerTask {
    counter: AtomicU64,
}

impl ThreadPerTask {
    /// Create a new thread-per-task scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadPerTask {
    fn submit(&self, job: Job) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("weft-task-{n}"))
            .spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                if outcome.is_err() {
                    tracing::debug!("task thread panicked");
                }
            })
            .expect("failed to spawn task thread");
    }
}

// ============================================================================
// Default-Scheduler Registry
// ============================================================================

/// The process-wide default scheduler.
///
/// Primitives constructed without an explicit scheduler resolve one here.
/// Install a scheduler with [`registry::init`] before creating primitives,
/// or let the first resolution lazily install a default [`ThreadPool`].
pub mod registry {
    use super::{PoolConfig, SchedulerRef, ThreadPool};
    use parking_lot::RwLock;
    use std::sync::Arc;

    /// Errors from registry operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    pub enum RegistryError {
        /// A default scheduler is already installed.
        #[error("a default scheduler is already installed")]
        AlreadyInitialized,
    }

    static DEFAULT_SCHEDULER: RwLock<Option<SchedulerRef>> = RwLock::new(None);

    /// Install the process-wide default scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyInitialized`] if a scheduler is
    /// already installed (explicitly or lazily).
    pub fn init(scheduler: SchedulerRef) -> Result<(), RegistryError> {
        let mut slot = DEFAULT_SCHEDULER.write();
        if slot.is_some() {
            return Err(RegistryError::AlreadyInitialized);
        }
        tracing::debug!("default scheduler installed");
        *slot = Some(scheduler);
        Ok(())
    }

    /// Drop the installed default scheduler, if any.
    ///
    /// Primitives that already captured the scheduler keep their reference;
    /// the next [`default_scheduler`] call installs a fresh default.
    pub fn shutdown() {
        DEFAULT_SCHEDULER.write().take();
    }

    /// Resolve the default scheduler, lazily installing a [`ThreadPool`]
    /// with default configuration when none was explicitly installed.
    #[must_use]
    pub fn default_scheduler() -> SchedulerRef {
        if let Some(scheduler) = DEFAULT_SCHEDULER.read().as_ref() {
            return Arc::clone(scheduler);
        }
        let mut slot = DEFAULT_SCHEDULER.write();
        // Another thread may have won the race between the read and write
        // locks.
        if let Some(scheduler) = slot.as_ref() {
            return Arc::clone(scheduler);
        }
        tracing::debug!("installing lazy default thread pool");
        let pool: SchedulerRef = Arc::new(ThreadPool::with_config(PoolConfig::default()));
        *slot = Some(Arc::clone(&pool));
        pool
    }
}

// ============================================================================
// Tests
// ============================================================================
