//! Thread-safe FIFO connecting pipeline stages.
//!
//! One queue per directed edge of the pipeline graph. Producers never block:
//! pushes are unbounded, so backpressure exists only where a consumer chooses
//! `blocking_pop`. Shutdown wakes every blocked popper; once a queue is shut
//! down all pops report empty, including for values still buffered.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// FIFO with blocking pop and cooperative shutdown.
pub struct ThreadsafeQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> ThreadsafeQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Push a value, waking one blocked popper.
    ///
    /// Returns `false` (dropping the value) if the queue has been shut down.
    pub fn push(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.items.push_back(value);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Suspend the caller until a value is available or the queue is shut
    /// down, in which case `None` is returned.
    pub fn blocking_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(value) = state.items.pop_front() {
                return Some(value);
            }
            self.available.wait(&mut state);
        }
    }

    /// Return immediately with a value or `None`; never suspends.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        state.items.pop_front()
    }

    /// Mark the queue closed and wake all blocked poppers.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for ThreadsafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = ThreadsafeQueue::new();
        for i in 0..10 {
            assert!(q.push(i));
        }
        for i in 0..10 {
            assert_eq!(q.blocking_pop(), Some(i));
        }
    }

    #[test]
    fn test_try_pop_never_suspends() {
        let q: ThreadsafeQueue<u32> = ThreadsafeQueue::new();
        assert_eq!(q.try_pop(), None);
        q.push(7);
        assert_eq!(q.try_pop(), Some(7));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_pop_after_shutdown_is_empty_even_with_items() {
        let q = ThreadsafeQueue::new();
        q.push(1);
        q.push(2);
        q.shutdown();
        assert_eq!(q.blocking_pop(), None);
        assert_eq!(q.try_pop(), None);
        assert!(!q.push(3));
    }

    #[test]
    fn test_shutdown_wakes_blocked_popper_within_bounded_time() {
        let q: Arc<ThreadsafeQueue<u32>> = Arc::new(ThreadsafeQueue::new());
        let (tx, rx) = mpsc::channel();

        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let result = q.blocking_pop();
                tx.send(result).unwrap();
            })
        };

        // Give the popper time to block, then shut down concurrently.
        thread::sleep(Duration::from_millis(50));
        q.shutdown();

        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("popper did not wake after shutdown");
        assert_eq!(result, None);
        popper.join().unwrap();
    }

    #[test]
    fn test_single_consumer_observes_push_order_across_producer_thread() {
        let q: Arc<ThreadsafeQueue<u32>> = Arc::new(ThreadsafeQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..100 {
                    q.push(i);
                }
            })
        };
        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Some(v) = q.blocking_pop() {
                seen.push(v);
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
