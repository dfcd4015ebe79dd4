//! Contention-sharding composite router
//!
//! A fixed, power-of-two array of independent sub-queues with two global
//! round-robin cursors. Every push CAS-claims the next ticket from the push
//! cursor and delegates to shard `ticket & (N - 1)`; pops mirror with their
//! own cursor. Because both sides visit shards in the same order,
//! approximate global FIFO is preserved while the per-shard cursors absorb
//! the CAS contention a single engine would concentrate.
//!
//! This is strict round-robin partitioning, not hashing; with a single
//! producer the k-th push lands in shard `k mod N`.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::queue::linked::LinkedQueue;
use crate::queue::ConcurrentQueue;
use crate::util::CachePadded;
use crate::{Full, PushTimeout, UNBOUNDED};

/// Shard count used by [`ShardRouter::new`].
pub const DEFAULT_SHARD_COUNT: usize = 8;

/// A round-robin router over N independent backing queues.
///
/// Parameterized by the backing engine `Q`; the default configuration
/// routes over [`LinkedQueue`] shards. Any [`ConcurrentQueue`] works,
/// including another `ShardRouter`.
///
/// # Reset protocol
///
/// [`reset`](Self::reset) is the one operation here that must coordinate
/// with in-flight pushes and pops: it raises an atomic reset flag that new
/// operations observe and spin against, drains every shard, rewinds both
/// cursors, then lowers the flag. Operations that passed the flag check
/// before it was raised are allowed to finish.
///
/// # Examples
///
/// ```rust
/// use fluxq::queue::{ConcurrentQueue, RingSlotQueue, ShardRouter};
///
/// // Default: 8 linked-queue shards.
/// let router = ShardRouter::new();
/// router.push(1).unwrap();
/// assert_eq!(router.pop(), Some(1));
///
/// // Bounded shards via a factory.
/// let bounded = ShardRouter::with_shards(8, || RingSlotQueue::with_capacity(64));
/// bounded.push("job").unwrap();
/// # assert_eq!(bounded.pop(), Some("job"));
/// ```
pub struct ShardRouter<T: Send, Q: ConcurrentQueue<T> = LinkedQueue<T>> {
    /// The backing sub-queues; length is a power of two.
    shards: Box<[Q]>,

    /// `shards.len() - 1`, for ticket masking.
    mask: u64,

    /// Monotonic ticket counter for pushes.
    push_cursor: CachePadded<AtomicU64>,

    /// Monotonic ticket counter for pops.
    pop_cursor: CachePadded<AtomicU64>,

    /// Raised for the duration of a reset; new operations spin on it.
    resetting: AtomicBool,

    /// Signed so racing increments/decrements may transiently cross zero.
    len: AtomicIsize,

    _marker: PhantomData<fn(T) -> T>,
}

impl<T: Send> ShardRouter<T, LinkedQueue<T>> {
    /// Create a router over [`DEFAULT_SHARD_COUNT`] linked-queue shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT, LinkedQueue::new)
    }
}

impl<T: Send> Default for ShardRouter<T, LinkedQueue<T>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, Q: ConcurrentQueue<T>> ShardRouter<T, Q> {
    /// Create a router over `shard_count` shards built by `factory`.
    ///
    /// `shard_count` is rounded up to a power of two so the ticket-to-shard
    /// mapping is a mask.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is 0.
    pub fn with_shards(shard_count: usize, factory: impl FnMut() -> Q) -> Self {
        assert!(shard_count > 0, "shard count must be greater than 0");
        let shard_count = shard_count.next_power_of_two();

        let mut factory = factory;
        let shards: Vec<Q> = (0..shard_count).map(|_| factory()).collect();

        Self {
            shards: shards.into_boxed_slice(),
            mask: (shard_count - 1) as u64,
            push_cursor: CachePadded::new(AtomicU64::new(0)),
            pop_cursor: CachePadded::new(AtomicU64::new(0)),
            resetting: AtomicBool::new(false),
            len: AtomicIsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, ticket: u64) -> &Q {
        &self.shards[(ticket & self.mask) as usize]
    }

    /// Claim the next push ticket and delegate to its shard.
    ///
    /// The ticket is consumed even if the backing shard rejects the value;
    /// the value is handed back in [`Full`] as usual.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        loop {
            if self.resetting.load(Ordering::Acquire) {
                // Reset in progress; retry once it completes.
                std::thread::yield_now();
                continue;
            }
            let ticket = self.push_cursor.load(Ordering::Acquire);
            if self
                .push_cursor
                .compare_exchange_weak(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return match self.shard(ticket).push(value) {
                    Ok(()) => {
                        self.len.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(full) => Err(full),
                };
            }
            core::hint::spin_loop();
        }
    }

    /// Claim the next pop ticket and delegate to its shard.
    ///
    /// Returns `None` without claiming when the cursors are equal (no
    /// outstanding push tickets). A claimed ticket whose delegated push has
    /// not yet landed also reports `None` — the same weak-empty "try"
    /// semantics as the underlying engines.
    pub fn pop(&self) -> Option<T> {
        loop {
            if self.resetting.load(Ordering::Acquire) {
                std::thread::yield_now();
                continue;
            }
            let ticket = self.pop_cursor.load(Ordering::Acquire);
            if ticket == self.push_cursor.load(Ordering::Acquire) {
                return None;
            }
            if self
                .pop_cursor
                .compare_exchange_weak(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let value = self.shard(ticket).pop();
                if value.is_some() {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                return value;
            }
            core::hint::spin_loop();
        }
    }

    /// Pause-the-world reset: block new operations, drain every shard,
    /// rewind both cursors.
    ///
    /// Safe to call while pushes and pops are in flight; they spin against
    /// the reset flag and retry. Concurrent `reset` calls serialize on the
    /// same flag.
    pub fn reset(&self) {
        while self
            .resetting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::thread::yield_now();
        }

        for shard in self.shards.iter() {
            while shard.pop().is_some() {}
        }
        self.push_cursor.store(0, Ordering::Release);
        self.pop_cursor.store(0, Ordering::Release);
        self.len.store(0, Ordering::Release);

        self.resetting.store(false, Ordering::Release);
    }

    /// Best-effort element count across all shards; clamped at zero.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    /// Best-effort emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort fullness check: every shard reports full.
    pub fn is_full(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_full())
    }

    /// Sum of the shard capacities, or [`UNBOUNDED`] if any shard is
    /// unbounded.
    pub fn capacity(&self) -> usize {
        let mut total: usize = 0;
        for shard in self.shards.iter() {
            let capacity = shard.capacity();
            if capacity == UNBOUNDED {
                return UNBOUNDED;
            }
            total = total.saturating_add(capacity);
        }
        total
    }

    /// Retry `push` with exponential backoff until it succeeds or
    /// `timeout` elapses.
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

    /// Per-shard element counts, shard 0 first. Test support.
    #[cfg(test)]
    pub(crate) fn shard_lens(&self) -> Vec<usize> {
        self.shards.iter().map(|shard| shard.len()).collect()
    }
}

impl<T: Send, Q: ConcurrentQueue<T>> fmt::Debug for ShardRouter<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardRouter")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Send, Q: ConcurrentQueue<T>> ConcurrentQueue<T> for ShardRouter<T, Q> {
    fn push(&self, value: T) -> Result<(), Full<T>> {
        ShardRouter::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        ShardRouter::pop(self)
    }

    fn len(&self) -> usize {
        ShardRouter::len(self)
    }

    fn is_full(&self) -> bool {
        ShardRouter::is_full(self)
    }

    fn capacity(&self) -> usize {
        ShardRouter::capacity(self)
    }
}
