//! Worker thread pool for dispatching strategy and market-data callbacks
//!
//! A fixed set of OS threads pulls type-erased callables from a shared
//! concurrent queue. Submission hands back a [`TaskHandle`] carrying the
//! callable's result; [`ThreadPool::wait_all`] blocks until every submitted
//! task has completed, and [`ThreadPool::stop`] shuts the pool down either
//! draining or abandoning queued work.
//!
//! Workers busy-yield on an empty queue rather than suspending. The pool
//! targets feeds and strategy dispatch that are almost never idle; it is not
//! suited to low-rate background work.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]

mod error;
mod task;

pub use error::{PoolError, PoolResult, TaskError};
pub use task::{Task, TaskHandle};

use crate::task::{Completion, package, panic_message};
use parking_lot::Mutex;
use queue::{LockFreeQueue, WorkQueue};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use tracing::error;

/// Pool lifecycle states; transitions are one-way
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Running = 0,
    StoppingDrain = 1,
    StoppingAbandon = 2,
    Stopped = 3,
}

impl PoolState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::StoppingDrain,
            2 => Self::StoppingAbandon,
            _ => Self::Stopped,
        }
    }
}

/// Construction parameters for a [`ThreadPool`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads; must be non-zero
    pub worker_count: usize,
    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            thread_name_prefix: "worker".to_string(),
        }
    }
}

/// State shared between the pool handle and its workers
struct PoolShared<Q> {
    queue: Q,
    state: AtomicU8,
    completion: Arc<Completion>,
}

/// Fixed-size worker pool executing type-erased callables from a shared
/// concurrent queue
///
/// Backed by [`LockFreeQueue`] unless another [`WorkQueue`] implementation
/// is named; the queue choice does not change any pool semantics.
pub struct ThreadPool<Q: WorkQueue<Task> + 'static = LockFreeQueue<Task>> {
    shared: Arc<PoolShared<Q>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ThreadPool {
    /// Create a pool with `worker_count` workers over the lock-free queue
    ///
    /// # Errors
    /// Fails with [`PoolError::ZeroWorkers`] when `worker_count` is zero and
    /// with [`PoolError::Spawn`] when the OS refuses a thread.
    pub fn new(worker_count: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig {
            worker_count,
            ..PoolConfig::default()
        })
    }
}

impl<Q: WorkQueue<Task> + Default + 'static> ThreadPool<Q> {
    /// Create a pool from explicit configuration
    ///
    /// Workers observe the running state only after the shared state is
    /// fully constructed; the `Arc` publication provides the release fence.
    ///
    /// # Errors
    /// Fails with [`PoolError::ZeroWorkers`] when the configured worker
    /// count is zero and with [`PoolError::Spawn`] when the OS refuses a
    /// thread.
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        if config.worker_count == 0 {
            return Err(PoolError::ZeroWorkers);
        }

        let shared = Arc::new(PoolShared {
            queue: Q::default(),
            state: AtomicU8::new(PoolState::Running as u8),
            completion: Arc::new(Completion::new()),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{id}", config.thread_name_prefix))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count: config.worker_count,
        })
    }
}

impl<Q: WorkQueue<Task> + 'static> ThreadPool<Q> {
    /// Submit a callable for execution, receiving a handle to its result
    ///
    /// Never blocks. The outstanding count is incremented before the task
    /// becomes visible to workers, so a handle observed ready implies a
    /// consistent count.
    ///
    /// # Errors
    /// Fails with [`PoolError::Stopped`] once the pool has left the running
    /// state; the outstanding count is untouched in that case.
    pub fn submit<F, R>(&self, f: F) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.state() != PoolState::Running {
            return Err(PoolError::Stopped);
        }

        self.shared.completion.task_submitted();
        let (task, handle) = package(f, Arc::clone(&self.shared.completion));
        self.shared.queue.push(task);
        Ok(handle)
    }

    /// Suspend until every submitted task has completed or been discarded
    pub fn wait_all(&self) {
        self.shared.completion.wait_zero();
    }

    /// Submitted tasks that have not yet completed: queued plus currently
    /// executing. Approximate under concurrency, monotone-consistent.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.shared.completion.outstanding()
    }

    /// Number of worker threads
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.worker_count
    }

    /// Whether the pool still accepts submissions
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Stop the pool; only the first call has any effect
    ///
    /// With `wait_for_completion` every queued task is still executed and
    /// the call returns once the outstanding count reaches zero and all
    /// workers have exited. Otherwise queued tasks are discarded; their
    /// handles observe [`TaskError::Abandoned`] and tasks already executing
    /// run to completion.
    pub fn stop(&self, wait_for_completion: bool) {
        let target = if wait_for_completion {
            PoolState::StoppingDrain
        } else {
            PoolState::StoppingAbandon
        };
        if self
            .shared
            .state
            .compare_exchange(
                PoolState::Running as u8,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        if wait_for_completion {
            self.wait_all();
        } else {
            // Discarding pops each task and drops it; every drop decrements
            // the outstanding count and wakes waiters on the zero crossing.
            while self.shared.queue.pop().is_some() {}
        }

        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread terminated with a panic");
            }
        }

        self.shared.state.store(PoolState::Stopped as u8, Ordering::Release);
    }

    fn state(&self) -> PoolState {
        PoolState::from_u8(self.shared.state.load(Ordering::Acquire))
    }
}

impl<Q: WorkQueue<Task> + 'static> Drop for ThreadPool<Q> {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Per-worker execution loop
///
/// Busy-yields while the pool runs. Once the state leaves running, drains
/// the remaining work iff the stop asked for completion, else exits
/// immediately and leaves the queue to the stopping thread.
fn worker_loop<Q: WorkQueue<Task>>(shared: &PoolShared<Q>) {
    loop {
        match PoolState::from_u8(shared.state.load(Ordering::Acquire)) {
            PoolState::Running => match shared.queue.pop() {
                Some(task) => run_task(task),
                None => thread::yield_now(),
            },
            PoolState::StoppingDrain => {
                // Keep pulling until every outstanding task is accounted
                // for, covering submissions that raced the stop.
                while shared.completion.outstanding() != 0 {
                    match shared.queue.pop() {
                        Some(task) => run_task(task),
                        None => thread::yield_now(),
                    }
                }
                return;
            }
            PoolState::StoppingAbandon | PoolState::Stopped => return,
        }
    }
}

/// Execute one task, containing any infrastructure panic
///
/// User-level failures were already routed into the task's handle by its
/// wrapper; anything escaping here is logged and swallowed, and the task's
/// drop keeps the outstanding count consistent.
fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        error!(
            "task execution failed: {}",
            panic_message(payload.as_ref())
        );
    }
}
