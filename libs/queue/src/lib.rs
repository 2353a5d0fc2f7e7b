//! A bounded-growth blocking FIFO queue.
//!
//! Used for both the fiber run-queue and the I/O submission queue: a mutex
//! plus a condition variable guard a ring buffer that doubles in capacity
//! whenever it fills up, rather than rejecting new items or blocking the
//! producer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Starting capacity used by [`Queue::new`], matching the original runtime's
/// default queue size.
pub const DEFAULT_START_CAPACITY: usize = 1000;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// A FIFO queue shared between producers and consumers.
///
/// [`Queue::enqueue`] never blocks: once the queue is full its capacity is
/// doubled. [`Queue::dequeue`] blocks until an item is available;
/// [`Queue::try_dequeue`] never blocks.
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> Queue<T> {
    /// Creates a queue with [`DEFAULT_START_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_START_CAPACITY)
    }

    /// Creates a queue with the given starting capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends `item` to the back of the queue, doubling the queue's
    /// capacity if it is currently full, and wakes one waiting consumer.
    pub fn enqueue(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= inner.capacity {
            inner.capacity *= 2;
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Removes and returns the item at the front of the queue, blocking the
    /// calling thread until one is available.
    pub fn dequeue(&self) -> T {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return item;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Removes and returns the item at the front of the queue if one is
    /// immediately available, without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current allocated capacity, exposed for testing the growth policy.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = Queue::with_capacity(4);
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.dequeue(), 1);
        assert_eq!(q.dequeue(), 2);
        assert_eq!(q.dequeue(), 3);
    }

    #[test]
    fn grows_instead_of_rejecting() {
        let q = Queue::with_capacity(2);
        assert_eq!(q.capacity(), 2);
        q.enqueue(1);
        q.enqueue(2);
        assert_eq!(q.capacity(), 2);
        // Queue is full; the next enqueue must double capacity rather than fail.
        q.enqueue(3);
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), 1);
        assert_eq!(q.dequeue(), 2);
        assert_eq!(q.dequeue(), 3);
    }

    #[test]
    fn try_dequeue_does_not_block() {
        let q: Queue<i32> = Queue::new();
        assert_eq!(q.try_dequeue(), None);
        q.enqueue(42);
        assert_eq!(q.try_dequeue(), Some(42));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        let q = Arc::new(Queue::<i32>::new());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.dequeue());

        thread::sleep(Duration::from_millis(20));
        q.enqueue(7);

        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn concurrent_producers_preserve_fifo_per_producer() {
        let q = Arc::new(Queue::<(usize, usize)>::new());
        let mut handles = Vec::new();
        for producer in 0..4 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    q.enqueue((producer, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut last_seen = [None; 4];
        for _ in 0..400 {
            let (producer, i) = q.dequeue();
            if let Some(prev) = last_seen[producer] {
                assert!(i > prev, "FIFO order violated for producer {producer}");
            }
            last_seen[producer] = Some(i);
        }
    }
}
