//! Mutex-guarded FIFO between the network loop and application code
//!
//! One queue carries inbound messages (network thread produces, application
//! consumes), another carries outbound ones (the reverse). Elements are
//! owned by the queue while enqueued and move to whoever dequeues them.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::protocol::Message;

/// Thread-safe FIFO under a single lock.
#[derive(Debug)]
pub struct MessageQueue<T = Message> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Push to the back, taking ownership of `value`.
    #[inline]
    pub fn enqueue(&self, value: T) {
        self.inner.lock().push_back(value);
    }

    /// Pop the front element, or `None` when empty.
    #[inline]
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Take everything currently queued in one lock acquisition.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().drain(..).collect()
    }

    /// Snapshot; may be stale as soon as the lock is released.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot; may be stale as soon as the lock is released.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
