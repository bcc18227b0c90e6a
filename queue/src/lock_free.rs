//! Lock-free MPMC queue based on the Michael-Scott algorithm
//!
//! A singly linked list of heap nodes with a permanent sentinel at the
//! head. `head` and `tail` are atomic pointers; `tail` may transiently lag
//! one link behind the true tail and is advanced cooperatively by whichever
//! thread observes the lag. Producers link nodes at the tail, consumers
//! unlink at the head; neither path ever takes a lock.
//!
//! Reclamation relies on the allocator not handing the same node address
//! back while another thread can still hold a stale pointer to it (the
//! classic ABA window). Production hardening would pair this with hazard
//! pointers or epoch reclamation.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn with_value(value: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: Some(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// Lock-free multi-producer/multi-consumer FIFO queue
///
/// The first live payload sits in the node reachable from `head.next`; the
/// node `head` points at is always an empty sentinel.
pub struct LockFreeQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

// SAFETY: the queue hands each payload to exactly one consumer and every
// node is unlinked before it is freed, so sharing the queue itself across
// threads only requires the payloads to be Send.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
// SAFETY: see above; no operation hands out references into shared nodes.
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Create an empty queue holding only the sentinel
    #[must_use]
    pub fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
        }
    }

    /// Append `value` at the tail
    ///
    /// Never blocks; lock-free against any number of concurrent pushes and
    /// pops. Linearises at the CAS that links the new node.
    pub fn push(&self, value: T) {
        let new_node = Node::with_value(value);
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            // SAFETY: tail is never null, and a node the tail can still
            // reference is only freed after head has moved past it.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if !next.is_null() {
                // Another producer has linked a node; help advance the tail.
                tail = match self.tail.compare_exchange_weak(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => next,
                    Err(current) => current,
                };
                continue;
            }

            // SAFETY: as above, tail points at a live node.
            let linked = unsafe {
                (*tail)
                    .next
                    .compare_exchange_weak(
                        ptr::null_mut(),
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            };
            if linked {
                // Best effort: either this CAS or a helper's succeeds.
                let _ = self.tail.compare_exchange(
                    tail,
                    new_node,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                return;
            }
            tail = self.tail.load(Ordering::Relaxed);
        }
    }

    /// Remove the head element
    ///
    /// Returns `None` iff the queue was empty at some point between entry
    /// and return. Linearises at the CAS that advances `head`.
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            // SAFETY: head is never null; the sentinel stays alive until a
            // consumer wins the CAS that moves head past it.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if next.is_null() {
                return None;
            }

            if head == tail {
                // The tail lags one link behind; advance it before head can
                // overtake it and free the node it points at.
                let _ = self.tail.compare_exchange_weak(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                head = self.head.load(Ordering::Relaxed);
                continue;
            }

            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    // SAFETY: winning the CAS transfers exclusive ownership
                    // of the old sentinel and of the payload slot in the new
                    // one; no other thread will read either again.
                    let value = unsafe { (*next).value.take() };
                    // SAFETY: the old sentinel is unreachable from head and
                    // deleted exactly once, by this thread.
                    unsafe { drop(Box::from_raw(head)) };
                    return value;
                }
                Err(current) => head = current,
            }
        }
    }

    /// Best-effort emptiness snapshot; may race with concurrent mutators
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: head is never null and points at a live sentinel.
        unsafe { (*head).next.load(Ordering::Acquire).is_null() }
    }

    /// Pop until empty, dropping every element
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        self.clear();
        let head = *self.head.get_mut();
        if !head.is_null() {
            // SAFETY: exclusive access; after clear() only the sentinel
            // remains and nothing else references it.
            unsafe { drop(Box::from_raw(head)) };
        }
    }
}
