//! Bounded MPMC ring buffer with a four-state per-slot protocol
//!
//! ## Algorithm
//!
//! The ring is a power-of-two array of slots addressed by two monotonic
//! cursors (`push_cursor & mask`, `pop_cursor & mask`). Each slot carries
//! its own atomic state tag and moves through a fixed cycle:
//!
//! ```text
//! Empty --push CAS--> Filling --store value--> Full
//! Full  --pop  CAS--> Draining --take value--> Empty
//! ```
//!
//! A producer that wins the `Empty -> Filling` transition owns the slot; it
//! advances the push cursor *before* writing the value, so other producers
//! never serialize on its store latency. The cost is that a concurrent pop
//! can observe `Filling` and correctly report "empty" even though an
//! enqueue is nominally in progress. That weak-empty outcome is part of the
//! contract (see the [module docs](super)).
//!
//! ## Full/empty predicates
//!
//! Fullness is `push_cursor - pop_cursor` under wraparound-safe unsigned
//! subtraction, compared against `0` and `capacity`. Cursor equality
//! shortcuts that XOR the capacity into one side do not generalize over all
//! cursor values and are intentionally absent.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::queue::{ConcurrentQueue, DEFAULT_CAPACITY};
use crate::util::CachePadded;
use crate::{Full, PushTimeout};

/// Slot is vacant; a push may claim it.
const EMPTY: u8 = 0;
/// A push won the claim and is writing the value.
const FILLING: u8 = 1;
/// Value is published; a pop may claim it.
const FULL: u8 = 2;
/// A pop won the claim and is taking the value out.
const DRAINING: u8 = 3;

/// One storage cell of the ring. Owned exclusively by the queue that
/// allocated it; the state tag arbitrates which thread may touch `value`.
struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<Option<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(None),
        }
    }
}

/// A bounded multi-producer, multi-consumer ring buffer queue.
///
/// Capacity is fixed at construction and rounded up to a power of two.
/// `push` fails (returning the value) when the ring is full; `pop` returns
/// `None` when it is empty. Both are lock-free: a stalled thread can delay
/// delivery of the one slot it claimed, but never blocks the cursors.
///
/// # Examples
///
/// ```rust
/// use fluxq::RingSlotQueue;
///
/// let queue = RingSlotQueue::with_capacity(4);
/// for i in 1..=4 {
///     queue.push(i).unwrap();
/// }
/// assert!(queue.push(5).is_err()); // full
/// assert_eq!(queue.pop(), Some(1));
/// assert!(queue.push(5).is_ok());
/// ```
///
/// # Type parameters
///
/// Slots store `Option<T>`, with `None` marking vacancy. A caller whose
/// element type is itself `Option<U>` round-trips `None` payloads intact;
/// no sentinel wrapping is needed.
pub struct RingSlotQueue<T> {
    /// Ring storage; length is always `capacity`.
    slots: Box<[Slot<T>]>,

    /// Power-of-two capacity.
    capacity: usize,

    /// `capacity - 1`, for cursor masking.
    mask: u64,

    /// Next position to push to. Monotonic; wraps modulo 2^64.
    push_cursor: CachePadded<AtomicU64>,

    /// Next position to pop from. Monotonic; wraps modulo 2^64.
    pop_cursor: CachePadded<AtomicU64>,
}

// The state protocol hands each slot's interior to exactly one thread at a
// time, so sharing the queue only requires the element to be Send.
unsafe impl<T: Send> Send for RingSlotQueue<T> {}
unsafe impl<T: Send> Sync for RingSlotQueue<T> {}

impl<T> RingSlotQueue<T> {
    /// Create a queue with the default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a queue holding at least `capacity` elements.
    ///
    /// The capacity is rounded up to the next power of two so slot indexing
    /// is a mask instead of a division.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fluxq::RingSlotQueue;
    ///
    /// let queue: RingSlotQueue<i32> = RingSlotQueue::with_capacity(10);
    /// assert_eq!(queue.capacity(), 16);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        let capacity = capacity.next_power_of_two();

        let slots: Vec<Slot<T>> = (0..capacity).map(|_| Slot::vacant()).collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            mask: (capacity - 1) as u64,
            push_cursor: CachePadded::new(AtomicU64::new(0)),
            pop_cursor: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    fn slot(&self, cursor: u64) -> &Slot<T> {
        &self.slots[(cursor & self.mask) as usize]
    }

    /// Append a value, or hand it back in [`Full`] if the ring is at
    /// capacity.
    ///
    /// The claim CAS and the cursor advance happen before the value store,
    /// so a racing `pop` of this slot may transiently report empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fluxq::RingSlotQueue;
    ///
    /// let queue = RingSlotQueue::with_capacity(1);
    /// assert!(queue.push(1).is_ok());
    /// let rejected = queue.push(2).unwrap_err();
    /// assert_eq!(rejected.into_inner(), 2);
    /// ```
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        loop {
            let cursor = self.push_cursor.load(Ordering::Acquire);
            let slot = self.slot(cursor);

            // A published or draining slot at the push cursor means the
            // ring has wrapped onto unconsumed data.
            let state = slot.state.load(Ordering::Acquire);
            if state == FULL || state == DRAINING {
                return Err(Full(value));
            }

            if slot
                .state
                .compare_exchange(EMPTY, FILLING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Advance the cursor first; other producers proceed while
                // this thread finishes the store.
                self.push_cursor.fetch_add(1, Ordering::AcqRel);
                unsafe {
                    *slot.value.get() = Some(value);
                }
                slot.state.store(FULL, Ordering::Release);
                return Ok(());
            }

            // Lost the claim; another producer took this slot. Reload the
            // cursor and try the next one.
            core::hint::spin_loop();
        }
    }

    /// Remove and return the oldest value, or `None` when the ring is
    /// (weakly) empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fluxq::RingSlotQueue;
    ///
    /// let queue = RingSlotQueue::with_capacity(8);
    /// queue.push("a").unwrap();
    /// assert_eq!(queue.pop(), Some("a"));
    /// assert_eq!(queue.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        loop {
            let cursor = self.pop_cursor.load(Ordering::Acquire);
            let slot = self.slot(cursor);

            // Empty slot: nothing published here yet. Filling slot: a push
            // claimed it but has not published; report empty rather than
            // wait (weak-empty semantics).
            let state = slot.state.load(Ordering::Acquire);
            if state == EMPTY || state == FILLING {
                return None;
            }

            if slot
                .state
                .compare_exchange(FULL, DRAINING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.pop_cursor.fetch_add(1, Ordering::AcqRel);
                let value = unsafe { (*slot.value.get()).take() };
                slot.state.store(EMPTY, Ordering::Release);
                debug_assert!(value.is_some(), "claimed slot must hold a value");
                return value;
            }

            core::hint::spin_loop();
        }
    }

    /// Best-effort element count derived from the cursors.
    ///
    /// Exact only at quiescent points; under concurrent mutation the two
    /// cursor reads are not a synchronized snapshot.
    pub fn len(&self) -> usize {
        let push = self.push_cursor.load(Ordering::Acquire);
        let pop = self.pop_cursor.load(Ordering::Acquire);
        let diff = push.wrapping_sub(pop);
        if diff > u64::MAX / 2 {
            // Racing reads observed pop ahead of push.
            0
        } else {
            (diff as usize).min(self.capacity)
        }
    }

    /// Best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort fullness check: the cursors are `capacity` apart.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// The fixed capacity of the ring.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued elements and rewind both cursors.
    ///
    /// Takes `&mut self`: the exclusive borrow is what makes a reset safe
    /// against in-flight pushes and pops.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot.state.get_mut() = EMPTY;
            *slot.value.get_mut() = None;
        }
        *self.push_cursor.get_mut() = 0;
        *self.pop_cursor.get_mut() = 0;
    }

    /// Retry `push` with exponential backoff until it succeeds or
    /// `timeout` elapses, then hand the value back in [`PushTimeout`].
    ///
    /// Built strictly atop the non-blocking [`push`](Self::push); an
    /// attempt already started cannot be aborted, only not retried.
    pub fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), PushTimeout<T>> {
        let start = Instant::now();
        let mut backoff = Duration::from_nanos(100);
        let mut value = value;
        loop {
            match self.push(value) {
                Ok(()) => return Ok(()),
                Err(Full(v)) => value = v,
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PushTimeout(value));
            }
            std::thread::sleep(backoff.min(timeout - elapsed));
            backoff = (backoff * 2).min(Duration::from_millis(1));
        }
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

impl<T> Default for RingSlotQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RingSlotQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingSlotQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Send> ConcurrentQueue<T> for RingSlotQueue<T> {
    fn push(&self, value: T) -> Result<(), Full<T>> {
        RingSlotQueue::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        RingSlotQueue::pop(self)
    }

    fn len(&self) -> usize {
        RingSlotQueue::len(self)
    }

    fn is_full(&self) -> bool {
        RingSlotQueue::is_full(self)
    }

    fn capacity(&self) -> usize {
        RingSlotQueue::capacity(self)
    }
}
