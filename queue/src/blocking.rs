//! Locked FIFO queue with a blocking pop
//!
//! A mutex-guarded deque paired with a single condition variable. Suited to
//! consumers that prefer suspending on empty over busy-polling.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Mutex + condvar FIFO queue for any number of producers and consumers
pub struct BlockingQueue<T> {
    data: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Append `value` at the tail and wake one waiting consumer
    pub fn push(&self, value: T) {
        let mut data = self.data.lock();
        data.push_back(value);
        self.not_empty.notify_one();
    }

    /// Append every element of `values`, waking all waiting consumers
    pub fn push_bulk<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut data = self.data.lock();
        let before = data.len();
        data.extend(values);
        if data.len() > before {
            self.not_empty.notify_all();
        }
    }

    /// Remove the head element without blocking, `None` if empty
    pub fn pop(&self) -> Option<T> {
        self.data.lock().pop_front()
    }

    /// Remove the head element, suspending until one is available
    ///
    /// The wait re-checks the queue after every wakeup, so spurious wakeups
    /// only cost another pass through the loop.
    pub fn pop_blocking(&self) -> T {
        let mut data = self.data.lock();
        loop {
            if let Some(value) = data.pop_front() {
                return value;
            }
            self.not_empty.wait(&mut data);
        }
    }

    /// Number of queued elements at the instant of the call
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the queue was empty at the instant of the call
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Discard every queued element
    ///
    /// No notification is issued: the queue remains empty, so waiters would
    /// go straight back to sleep.
    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
