//! Mutex-protected reference queue
//!
//! A plain `Mutex<VecDeque>` behind the same contract as the lock-free
//! engines. Exists as a correctness oracle for differential tests and as a
//! baseline in the benchmarks; not intended for production use.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::queue::ConcurrentQueue;
use crate::{Full, UNBOUNDED};

/// Coarse-grained locked FIFO with strict (non-weak) semantics.
///
/// Because every operation holds the lock, `len` is exact and `pop`
/// returns `None` only when the queue is truly empty. Differential tests
/// lean on that strictness when comparing against the lock-free engines.
#[derive(Debug)]
pub struct MutexQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> MutexQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a value. Never fails; the `Result` shape exists only to
    /// match the shared contract.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        self.inner.lock().unwrap().push_back(value);
        Ok(())
    }

    /// Remove and return the oldest value.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Exact element count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Exact emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all elements.
    pub fn clear(&mut self) {
        self.inner.get_mut().unwrap().clear();
    }

    /// Poll `pop` until a value arrives or `timeout` elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let start = Instant::now();
        let mut backoff = Duration::from_nanos(100);
        loop {
            if let Some(value) = self.pop() {
                return Some(value);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            std::thread::sleep(backoff.min(timeout - elapsed));
            backoff = (backoff * 2).min(Duration::from_millis(1));
        }
    }
}

impl<T> Default for MutexQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> ConcurrentQueue<T> for MutexQueue<T> {
    fn push(&self, value: T) -> Result<(), Full<T>> {
        MutexQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        MutexQueue::pop(self)
    }

    fn len(&self) -> usize {
        MutexQueue::len(self)
    }

    fn is_full(&self) -> bool {
        false
    }

    fn capacity(&self) -> usize {
        UNBOUNDED
    }
}
