//! Unbounded MPMC queue over a chain of growing ring segments
//!
//! A forward-linked sequence of [`RingSlotQueue`] segments. Producers push
//! into the tail segment; when it fills, one of them links a fresh segment
//! of twice the capacity (capped) onto `next` and the chain's `tail` moves
//! forward. Consumers drain the head segment; once it is exhausted *and*
//! has a successor, `head` is swung forward and the spent segment retired.
//! An abandoned segment never reuses its slots.
//!
//! Compared to [`LinkedQueue`](super::LinkedQueue), allocation cost is
//! amortized over a whole segment rather than paid per element.
//!
//! There is no linearizability across segment creation: a pop may observe
//! a push into a brand-new segment before an older, slower push into a
//! previous segment has published its value.

use core::fmt;
use core::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

use crate::queue::ring::RingSlotQueue;
use crate::queue::ConcurrentQueue;
use crate::util::CachePadded;
use crate::{Full, UNBOUNDED};

/// Capacity of the first segment.
pub const INITIAL_SEGMENT_CAPACITY: usize = 8;

/// Hard ceiling on segment capacity; growth caps here.
pub const MAX_SEGMENT_CAPACITY: usize = 1 << 30;

/// One link of the chain. `next` transitions `null -> non-null` exactly
/// once, by the producer that wins the growth race.
struct Segment<T> {
    ring: RingSlotQueue<T>,
    next: Atomic<Segment<T>>,
}

impl<T> Segment<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingSlotQueue::with_capacity(capacity),
            next: Atomic::null(),
        }
    }
}

/// An unbounded MPMC queue built from geometrically growing ring segments.
///
/// # Examples
///
/// ```rust
/// use fluxq::ChainQueue;
///
/// let queue = ChainQueue::new();
/// for i in 0..1000 {
///     queue.push(i).unwrap(); // grows 8 -> 16 -> 32 ... as needed
/// }
/// assert_eq!(queue.len(), 1000);
/// assert_eq!(queue.pop(), Some(0));
/// ```
pub struct ChainQueue<T> {
    /// Segment consumers drain from.
    head: CachePadded<Atomic<Segment<T>>>,

    /// Segment producers push into.
    tail: CachePadded<Atomic<Segment<T>>>,

    /// Ceiling for segment growth.
    max_segment_capacity: usize,
}

unsafe impl<T: Send> Send for ChainQueue<T> {}
unsafe impl<T: Send> Sync for ChainQueue<T> {}

impl<T: Send> ChainQueue<T> {
    /// Create an empty chain with the default segment bounds
    /// ([`INITIAL_SEGMENT_CAPACITY`] doubling up to
    /// [`MAX_SEGMENT_CAPACITY`]).
    pub fn new() -> Self {
        Self::with_segment_bounds(INITIAL_SEGMENT_CAPACITY, MAX_SEGMENT_CAPACITY)
    }

    /// Create an empty chain whose first segment holds `initial` elements
    /// and whose segments stop doubling at `max`. Both round up to powers
    /// of two.
    ///
    /// # Panics
    ///
    /// Panics if `initial` is 0 or exceeds `max`.
    pub fn with_segment_bounds(initial: usize, max: usize) -> Self {
        assert!(initial > 0, "initial segment capacity must be greater than 0");
        let initial = initial.next_power_of_two();
        let max = max.next_power_of_two();
        assert!(initial <= max, "initial segment capacity exceeds the maximum");

        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            max_segment_capacity: max,
        };
        unsafe {
            let guard = epoch::unprotected();
            let first = Owned::new(Segment::with_capacity(initial)).into_shared(guard);
            queue.head.store(first, Ordering::Relaxed);
            queue.tail.store(first, Ordering::Relaxed);
        }
        queue
    }

    /// Append a value; a full tail segment triggers growth.
    ///
    /// Never fails; the `Result` shape exists only to match the shared
    /// contract. The producer that wins the `next` link race advances
    /// `tail` and retries first, but any producer may complete a store into
    /// the new segment.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let guard = &epoch::pin();
        let mut value = value;
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            let tail_ref = unsafe { tail.deref() };

            match tail_ref.ring.push(value) {
                Ok(()) => return Ok(()),
                Err(Full(v)) => value = v,
            }

            // Tail segment is full. If a successor already exists, help
            // swing tail forward and retry there.
            let next = tail_ref.next.load(Ordering::Acquire, guard);
            if !next.is_null() {
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            let grown = (tail_ref.ring.capacity() * 2).min(self.max_segment_capacity);
            let segment = Owned::new(Segment::with_capacity(grown));
            match tail_ref.next.compare_exchange(
                Shared::null(),
                segment,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(linked) => {
                    let _ = self.tail.compare_exchange(
                        tail,
                        linked,
                        Ordering::Release,
                        Ordering::Relaxed,
                        guard,
                    );
                }
                Err(_) => {
                    // Lost the growth race; the competing segment is
                    // already linked and ours is dropped.
                }
            }
        }
    }

    /// Remove and return the oldest value, or `None` when the whole chain
    /// is empty.
    ///
    /// `head.next` is snapshotted *before* the pop attempt: only a segment
    /// that was observed to have a successor and then failed a pop is
    /// permanently exhausted and safe to drop from the chain.
    pub fn pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        let mut head = self.head.load(Ordering::Acquire, guard);
        loop {
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, guard);

            if let Some(value) = head_ref.ring.pop() {
                return Some(value);
            }

            if next.is_null() {
                return None;
            }

            // Head segment is spent; swing head forward. The loser of this
            // race just moves on to the successor it already holds.
            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                // Racing consumers may still be reading the detached
                // segment; the epoch guard defers its destruction.
                unsafe {
                    guard.defer_destroy(head);
                }
            }
            head = next;
        }
    }

    /// Best-effort element count: the sum of the live segments' sizes.
    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        let mut sum = 0;
        let mut segment = self.head.load(Ordering::Acquire, guard);
        while let Some(seg) = unsafe { segment.as_ref() } {
            sum += seg.ring.len();
            segment = seg.next.load(Ordering::Acquire, guard);
        }
        sum
    }

    /// Best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Always `false`; a full tail segment grows instead.
    pub fn is_full(&self) -> bool {
        false
    }

    /// Always [`UNBOUNDED`].
    pub fn capacity(&self) -> usize {
        UNBOUNDED
    }

    /// Drop all queued elements and restart from a single initial segment.
    ///
    /// Takes `&mut self`; not usable concurrently with pushes and pops.
    pub fn clear(&mut self) {
        *self = Self::with_segment_bounds(INITIAL_SEGMENT_CAPACITY, self.max_segment_capacity);
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

    /// Capacities of the live segments, head to tail. Test support.
    #[cfg(test)]
    pub(crate) fn segment_capacities(&self) -> Vec<usize> {
        let guard = &epoch::pin();
        let mut capacities = Vec::new();
        let mut segment = self.head.load(Ordering::Acquire, guard);
        while let Some(seg) = unsafe { segment.as_ref() } {
            capacities.push(seg.ring.capacity());
            segment = seg.next.load(Ordering::Acquire, guard);
        }
        capacities
    }
}

impl<T: Send> Default for ChainQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ChainQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut segment = self.head.load(Ordering::Relaxed, guard);
            while !segment.is_null() {
                let next = segment.deref().next.load(Ordering::Relaxed, guard);
                drop(segment.into_owned());
                segment = next;
            }
        }
    }
}

impl<T> fmt::Debug for ChainQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainQueue")
            .field("max_segment_capacity", &self.max_segment_capacity)
            .finish()
    }
}

impl<T: Send> ConcurrentQueue<T> for ChainQueue<T> {
    fn push(&self, value: T) -> Result<(), Full<T>> {
        ChainQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        ChainQueue::pop(self)
    }

    fn len(&self) -> usize {
        ChainQueue::len(self)
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
        let queue = ChainQueue::new();

        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);

        queue.push(1).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_across_segments() {
        let queue = ChainQueue::new();
        // Well past the first few segment boundaries (8 + 16 + 32 + ...).
        for i in 0..500 {
            queue.push(i).unwrap();
        }
        for i in 0..500 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_growth_doubles_capacities() {
        let queue = ChainQueue::new();
        for i in 0..100 {
            queue.push(i).unwrap();
        }
        let capacities = queue.segment_capacities();
        assert_eq!(capacities[0], INITIAL_SEGMENT_CAPACITY);
        for pair in capacities.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
    }

    #[test]
    fn test_growth_caps_at_max() {
        let queue = ChainQueue::with_segment_bounds(2, 4);
        for i in 0..40 {
            queue.push(i).unwrap();
        }
        let capacities = queue.segment_capacities();
        assert_eq!(capacities[0], 2);
        assert!(capacities[1..].iter().all(|&c| c <= 4));
        assert!(capacities.iter().sum::<usize>() >= 40);
    }

    #[test]
    fn test_head_advances_past_spent_segments() {
        let queue = ChainQueue::new();
        for i in 0..100 {
            queue.push(i).unwrap();
        }
        for i in 0..100 {
            assert_eq!(queue.pop(), Some(i));
        }
        // Everything before the live tail segment has been dropped.
        assert_eq!(queue.segment_capacities().len(), 1);
    }

    #[test]
    fn test_interleaved_push_pop() {
        let queue = ChainQueue::new();
        for round in 0..50 {
            for i in 0..7 {
                queue.push(round * 7 + i).unwrap();
            }
            for i in 0..7 {
                assert_eq!(queue.pop(), Some(round * 7 + i));
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_conservation() {
        let queue = Arc::new(ChainQueue::new());
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

        let queue = ChainQueue::new();
        for _ in 0..100 {
            queue.push(DropCounter).unwrap();
        }
        for _ in 0..30 {
            queue.pop();
        }
        drop(queue);

        assert_eq!(DROPS.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_clear() {
        let mut queue = ChainQueue::new();
        for i in 0..100 {
            queue.push(i).unwrap();
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.segment_capacities(), vec![INITIAL_SEGMENT_CAPACITY]);
    }
}
