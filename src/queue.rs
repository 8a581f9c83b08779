//! Bounded blocking FIFO connecting pipeline stages
//!
//! Producers block while the queue is full, consumers block while it is
//! empty. There is no timeout and no drop policy: blocking is the only
//! back-pressure mechanism.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Fixed-capacity multi-producer multi-consumer queue.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A capacity of zero is raised to one; a zero-slot queue could never
    /// hand an item over.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        BoundedQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append `item`, blocking while the queue is full.
    pub fn enqueue(&self, item: T) {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            self.not_full.wait(&mut items);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
    }

    /// Remove the oldest item, blocking while the queue is empty.
    pub fn dequeue(&self) -> T {
        let mut items = self.items.lock();
        let item = loop {
            if let Some(item) = items.pop_front() {
                break item;
            }
            self.not_empty.wait(&mut items);
        };
        drop(items);
        self.not_full.notify_one();
        item
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the current occupancy. Diagnostic use only.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }
}
