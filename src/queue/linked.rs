//! Unbounded MPMC linked queue (Michael–Scott style)
//!
//! A sentinel-headed singly linked list with atomic `head` and `tail`
//! pointers. `head` always points at an already-drained node; `tail` may
//! lag behind the true last node and is advanced opportunistically by
//! whichever thread notices.
//!
//! ## Memory reclamation
//!
//! Retired sentinels are reclaimed through `crossbeam_epoch`. Every
//! operation pins the current epoch for its duration, so a node another
//! thread still holds from a stale snapshot is never freed under it — the
//! classic unlink/free race of naive implementations (a stale `head` CAS
//! succeeding against recycled memory) cannot occur.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicIsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

use crate::queue::ConcurrentQueue;
use crate::util::CachePadded;
use crate::{Full, UNBOUNDED};

/// One heap-allocated list cell. `next` transitions `null -> non-null`
/// exactly once, by exactly one producer. The sentinel's value is `None`;
/// a pop that advances `head` takes ownership of the new sentinel's value.
struct Node<T> {
    value: UnsafeCell<Option<T>>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            value: UnsafeCell::new(None),
            next: Atomic::null(),
        }
    }

    fn with_value(value: T) -> Self {
        Self {
            value: UnsafeCell::new(Some(value)),
            next: Atomic::null(),
        }
    }
}

/// An unbounded multi-producer, multi-consumer linked queue.
///
/// `push` always succeeds; `pop` returns `None` when the queue is empty.
/// Both are lock-free CAS retry loops that help a lagging `tail` along
/// rather than waiting on the thread that left it behind.
///
/// # Examples
///
/// ```rust
/// use fluxq::LinkedQueue;
///
/// let queue = LinkedQueue::new();
/// queue.push("a").unwrap();
/// queue.push("b").unwrap();
/// assert_eq!(queue.pop(), Some("a"));
/// assert_eq!(queue.pop(), Some("b"));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct LinkedQueue<T> {
    /// Points at the current sentinel.
    head: CachePadded<Atomic<Node<T>>>,

    /// Points at the last node, or one behind it.
    tail: CachePadded<Atomic<Node<T>>>,

    /// Signed so racing increments/decrements may transiently cross zero;
    /// `len()` clamps.
    len: AtomicIsize,
}

unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T> LinkedQueue<T> {
    /// Create an empty queue (one sentinel node).
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            len: AtomicIsize::new(0),
        };
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }
        queue
    }

    /// Append a value at the tail.
    ///
    /// Never fails; the `Result` shape exists only to match the shared
    /// contract. If `tail.next` is found non-null, another producer
    /// finished linking but not swinging `tail`; this thread helps advance
    /// it and retries.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let guard = &epoch::pin();
        let mut new = Owned::new(Node::with_value(value));
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            // Stale snapshot; tail moved under us.
            if tail != self.tail.load(Ordering::Acquire, guard) {
                continue;
            }

            if !next.is_null() {
                // tail is not the last node; help advance it.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            match tail_ref.next.compare_exchange(
                Shared::null(),
                new,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(linked) => {
                    // Linked; swinging tail is best-effort, another thread
                    // may already have done it.
                    let _ = self.tail.compare_exchange(
                        tail,
                        linked,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) => new = err.new,
            }
        }
    }

    /// Remove and return the value at the head, or `None` when empty.
    ///
    /// The value is read from `head.next` while the epoch guard is held,
    /// *before* the unlinking CAS retires the old sentinel; the node stays
    /// alive until every concurrent pin ends.
    pub fn pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);

            if head != self.head.load(Ordering::Acquire, guard) {
                continue;
            }

            let next_ref = match unsafe { next.as_ref() } {
                Some(node) => node,
                None => return None,
            };

            if head == tail {
                // Non-null next with head == tail: tail fell behind.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                // Winning the CAS transfers ownership of the new
                // sentinel's payload to this thread.
                let value = unsafe { (*next_ref.value.get()).take() };
                unsafe {
                    guard.defer_destroy(head);
                }
                debug_assert!(value.is_some(), "non-sentinel node must hold a value");
                return value;
            }
        }
    }

    /// Best-effort element count; clamped at zero.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    /// Best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Always `false`; the queue grows until allocation fails.
    pub fn is_full(&self) -> bool {
        false
    }

    /// Always [`UNBOUNDED`].
    pub fn capacity(&self) -> usize {
        UNBOUNDED
    }

    /// Drop all queued elements, leaving a fresh sentinel.
    ///
    /// Takes `&mut self`; resetting concurrently with pushes and pops is
    /// not supported (see [`ShardRouter::reset`](crate::ShardRouter::reset)
    /// for the pause-the-world variant).
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Retry `pop` with exponential backoff until a value arrives or
    /// `timeout` elapses.
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

impl<T> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        // &mut self: no other thread can touch the list, reclaim directly.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

impl<T> fmt::Debug for LinkedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedQueue").field("len", &self.len()).finish()
    }
}

impl<T: Send> ConcurrentQueue<T> for LinkedQueue<T> {
    fn push(&self, value: T) -> Result<(), Full<T>> {
        LinkedQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        LinkedQueue::pop(self)
    }

    fn len(&self) -> usize {
        LinkedQueue::len(self)
    }

    fn is_full(&self) -> bool {
        false
    }

    fn capacity(&self) -> usize {
        UNBOUNDED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let queue = LinkedQueue::new();

        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);

        queue.push(1).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_ordering() {
        let queue = LinkedQueue::new();
        for i in 0..10 {
            queue.push(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_option_payloads_round_trip() {
        let queue: LinkedQueue<Option<&str>> = LinkedQueue::new();
        queue.push(Some("a")).unwrap();
        queue.push(None).unwrap();
        assert_eq!(queue.pop(), Some(Some("a")));
        assert_eq!(queue.pop(), Some(None));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_unbounded_surface() {
        let queue: LinkedQueue<i32> = LinkedQueue::new();
        assert!(!queue.is_full());
        assert_eq!(queue.capacity(), UNBOUNDED);
        for i in 0..10_000 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 10_000);
    }

    #[test]
    fn test_clear() {
        let mut queue = LinkedQueue::new();
        for i in 0..100 {
            queue.push(i).unwrap();
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
        queue.push(5).unwrap();
        assert_eq!(queue.pop(), Some(5));
    }

    #[test]
    fn test_concurrent_conservation() {
        let queue = Arc::new(LinkedQueue::new());
        let producers = 4;
        let consumers = 4;
        let per_producer = 2_500;

        let mut handles = vec![];
        for p in 0..producers {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    queue.push(p * per_producer + i).unwrap();
                }
            }));
        }

        let mut drains = vec![];
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            drains.push(thread::spawn(move || {
                let mut received = Vec::new();
                while received.len() < producers * per_producer / consumers {
                    match queue.pop() {
                        Some(v) => received.push(v),
                        None => thread::yield_now(),
                    }
                }
                received
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        let mut all: Vec<usize> = Vec::new();
        for drain in drains {
            all.extend(drain.join().unwrap());
        }

        all.sort_unstable();
        let expected: Vec<usize> = (0..producers * per_producer).collect();
        assert_eq!(all, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_safety() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let queue = LinkedQueue::new();
        for _ in 0..100 {
            queue.push(DropCounter).unwrap();
        }
        for _ in 0..50 {
            queue.pop();
        }
        drop(queue);

        assert_eq!(DROPS.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_pop_timeout() {
        let queue = Arc::new(LinkedQueue::new());
        let pusher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.push(3).unwrap();
            })
        };
        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some(3));
        pusher.join().unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), None);
    }
}
