//! Bounded single-producer / single-consumer queue with true backpressure.
//!
//! A full queue never drops or overwrites: the producer waits, either until a
//! deadline ([`BackpressureQueue::try_write_until`]) or indefinitely
//! ([`BackpressureQueue::blocking_write`]). The consumer side never blocks.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use circular_buffer::CircularBuffer;

/// Decoded frames buffered per tile before the producer has to wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 180;

pub struct BackpressureQueue<T, const N: usize = DEFAULT_QUEUE_CAPACITY> {
    buffer: Mutex<Box<CircularBuffer<N, T>>>,
    writable: Condvar,
}

impl<T, const N: usize> Default for BackpressureQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BackpressureQueue<T, N> {
    pub fn new() -> Self {
        assert!(N > 0, "queue capacity must be positive");
        Self {
            buffer: Mutex::new(CircularBuffer::boxed()),
            writable: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<CircularBuffer<N, T>>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues `item`, waiting for a free slot until `deadline`.
    /// On timeout the item is handed back untouched.
    pub fn try_write_until(&self, item: T, deadline: Instant) -> Result<(), T> {
        let mut buffer = self.lock();
        loop {
            if !buffer.is_full() {
                buffer.push_back(item);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(item);
            }
            buffer = self
                .writable
                .wait_timeout(buffer, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// Enqueues `item`, waiting as long as it takes.
    pub fn blocking_write(&self, item: T) {
        let mut buffer = self.lock();
        while buffer.is_full() {
            buffer = self
                .writable
                .wait(buffer)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        buffer.push_back(item);
    }

    /// Non-blocking pop of the oldest item.
    pub fn read_if_not_empty(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> fmt::Debug for BackpressureQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackpressureQueue")
            .field("len", &self.len())
            .field("capacity", &N)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reads_in_write_order() {
        let queue: BackpressureQueue<u32, 8> = BackpressureQueue::new();
        for value in 0..8 {
            queue.blocking_write(value);
        }
        assert!(queue.is_full());
        let drained: Vec<_> = std::iter::from_fn(|| queue.read_if_not_empty()).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn timed_write_on_full_queue_hands_item_back() {
        let queue: BackpressureQueue<&str, 1> = BackpressureQueue::new();
        assert_eq!(queue.try_write_until("first", Instant::now()), Ok(()));
        let started = Instant::now();
        let rejected = queue.try_write_until("second", Instant::now() + Duration::from_millis(30));
        assert_eq!(rejected, Err("second"));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(queue.read_if_not_empty(), Some("first"));
        assert_eq!(queue.read_if_not_empty(), None);
    }

    #[test]
    fn default_capacity() {
        let queue: BackpressureQueue<u8> = BackpressureQueue::new();
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn blocked_writer_resumes_when_a_slot_frees() {
        let queue: Arc<BackpressureQueue<u32, 2>> = Arc::new(BackpressureQueue::new());
        queue.blocking_write(1);
        queue.blocking_write(2);

        let writer = {
            let queue = queue.clone();
            thread::spawn(move || queue.blocking_write(3))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.read_if_not_empty(), Some(1));
        writer.join().unwrap();
        assert_eq!(queue.read_if_not_empty(), Some(2));
        assert_eq!(queue.read_if_not_empty(), Some(3));
    }
}
