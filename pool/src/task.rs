//! Type-erased task payloads and their result handles

use crate::error::TaskError;
use crossbeam::channel::{self, Receiver};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Completion bookkeeping shared between the pool, its tasks and waiters
///
/// `outstanding` equals submitted minus completed, where completion means
/// the callable returned, panicked, or was discarded unexecuted.
pub(crate) struct Completion {
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    all_done: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            lock: Mutex::new(()),
            all_done: Condvar::new(),
        }
    }

    /// Account for a newly submitted task
    pub(crate) fn task_submitted(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Account for a finished or discarded task, waking every waiter on the
    /// zero crossing
    pub(crate) fn task_finished(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Taking the lock orders the notify after any waiter's re-check.
            let _guard = self.lock.lock();
            self.all_done.notify_all();
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Suspend until every submitted task has finished or been discarded
    pub(crate) fn wait_zero(&self) {
        let mut guard = self.lock.lock();
        while self.outstanding.load(Ordering::Acquire) != 0 {
            self.all_done.wait(&mut guard);
        }
    }
}

/// A queued unit of work: a zero-argument, no-return invocation
///
/// Dropping a task always runs its completion accounting, whether the
/// callable executed, panicked, or was discarded by an abandoning stop, so
/// the outstanding count can never leak.
pub struct Task {
    job: Option<Box<dyn FnOnce() + Send + 'static>>,
    completion: Arc<Completion>,
}

impl Task {
    fn new(job: Box<dyn FnOnce() + Send + 'static>, completion: Arc<Completion>) -> Self {
        Self {
            job: Some(job),
            completion,
        }
    }

    /// Execute the wrapped callable, consuming the task
    pub(crate) fn run(mut self) {
        if let Some(job) = self.job.take() {
            job();
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.completion.task_finished();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("executed", &self.job.is_none())
            .finish()
    }
}

/// One-shot handle to a submitted task's result
///
/// The consuming [`wait`](Self::wait) either yields the callable's return
/// value, re-surfaces its panic as [`TaskError::Panicked`], or reports
/// [`TaskError::Abandoned`] if the task was discarded before running.
pub struct TaskHandle<R> {
    result: Receiver<Result<R, TaskError>>,
}

impl<R> TaskHandle<R> {
    /// Suspend until the task finishes and take its result
    pub fn wait(self) -> Result<R, TaskError> {
        match self.result.recv() {
            Ok(outcome) => outcome,
            // The task was dropped without running; the sending side is gone.
            Err(channel::RecvError) => Err(TaskError::Abandoned),
        }
    }

    /// Whether a result is already available
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.result.is_empty()
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Bind a callable to a fresh result slot, producing the queue payload and
/// the caller-facing handle
///
/// The payload catches any panic from the callable and routes it into the
/// result slot; the pool's workers never see user-level failures.
pub(crate) fn package<F, R>(f: F, completion: Arc<Completion>) -> (Task, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = channel::bounded(1);
    let job = Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            TaskError::Panicked {
                message: panic_message(payload.as_ref()),
            }
        });
        // The handle may already be gone; then there is nobody to inform.
        let _ = sender.send(outcome);
    });
    (Task::new(job, completion), TaskHandle { result: receiver })
}

/// Render a panic payload as text, preserving string payloads verbatim
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executed_task_delivers_result() {
        let completion = Arc::new(Completion::new());
        completion.task_submitted();
        let (task, handle) = package(|| 41 + 1, Arc::clone(&completion));

        task.run();
        assert!(handle.is_ready());
        assert_eq!(handle.wait().expect("task completed"), 42);
        assert_eq!(completion.outstanding(), 0);
    }

    #[test]
    fn dropped_task_breaks_its_promise() {
        let completion = Arc::new(Completion::new());
        completion.task_submitted();
        let (task, handle) = package(|| 7, Arc::clone(&completion));

        drop(task);
        assert!(matches!(handle.wait(), Err(TaskError::Abandoned)));
        assert_eq!(completion.outstanding(), 0);
    }

    #[test]
    fn panic_is_routed_into_the_handle() {
        let completion = Arc::new(Completion::new());
        completion.task_submitted();
        let (task, handle) = package(|| -> u32 { panic!("boom") }, Arc::clone(&completion));

        task.run();
        match handle.wait() {
            Err(TaskError::Panicked { message }) => assert_eq!(message, "boom"),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(completion.outstanding(), 0);
    }

    #[test]
    fn panic_messages_render_all_payload_shapes() {
        assert_eq!(panic_message(&"literal"), "literal");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&17_u32), "non-string panic payload");
    }
}
