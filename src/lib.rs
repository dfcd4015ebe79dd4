//! # fluxq
//!
//! A library of concurrent, in-memory FIFO containers intended as low-level
//! building blocks for work queues, buffering layers and fan-in/fan-out
//! pipelines.
//!
//! ## Engines
//!
//! Four engines implement one abstract contract ([`ConcurrentQueue`]), so
//! callers can pick the strategy matching their throughput/memory tradeoff:
//!
//! - [`RingSlotQueue`]: bounded MPMC ring buffer with a four-state per-slot
//!   protocol
//! - [`LinkedQueue`]: unbounded Michael–Scott linked queue with epoch-based
//!   reclamation
//! - [`ChainQueue`]: unbounded chain of geometrically growing ring segments
//! - [`ShardRouter`]: round-robin composite spreading contention over N
//!   independent sub-queues
//!
//! A trivial mutex-based [`MutexQueue`] is included as a reference oracle
//! for tests and benchmarks.
//!
//! ## Philosophy
//!
//! - All coordination goes through atomic loads/stores and compare-and-swap;
//!   there are no blocking primitives and no queue of waiters
//! - Operations that cannot make progress return immediately; "blocking"
//!   convenience wrappers busy-retry with backoff strictly on top of the
//!   non-blocking primitives
//! - Failures are local, typed values handed back to the caller, never
//!   panics
//!
//! ## Quick start
//!
//! ```rust
//! use fluxq::RingSlotQueue;
//!
//! let queue = RingSlotQueue::with_capacity(64);
//! queue.push(42).unwrap();
//! assert_eq!(queue.pop(), Some(42));
//! ```
//!
//! ## Thread safety
//!
//! Every container is safe to share across threads behind an `Arc` without
//! additional synchronization. Size and fullness queries are best-effort
//! snapshots and may be stale under concurrent mutation.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod queue;

pub use crate::queue::{
    ChainQueue, ConcurrentQueue, LinkedQueue, MutexQueue, RingSlotQueue, ShardRouter,
};

/// Capacity reported by engines that can grow without bound.
pub const UNBOUNDED: usize = usize::MAX;

/// Common utilities and helper types.
pub mod util {
    /// Cache line size for alignment purposes.
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Pads and aligns a value to a cache line so that hot atomics owned by
    /// different threads never share a line.
    #[derive(Default)]
    #[repr(align(64))]
    pub struct CachePadded<T> {
        value: T,
    }

    impl<T> CachePadded<T> {
        /// Wrap a value in cache-line padding.
        #[inline]
        pub const fn new(value: T) -> Self {
            Self { value }
        }

        /// Get the inner value.
        #[inline]
        pub fn into_inner(self) -> T {
            self.value
        }
    }

    impl<T> core::ops::Deref for CachePadded<T> {
        type Target = T;

        #[inline]
        fn deref(&self) -> &T {
            &self.value
        }
    }

    impl<T> core::ops::DerefMut for CachePadded<T> {
        #[inline]
        fn deref_mut(&mut self) -> &mut T {
            &mut self.value
        }
    }

    impl<T: core::fmt::Debug> core::fmt::Debug for CachePadded<T> {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            core::fmt::Debug::fmt(&self.value, f)
        }
    }
}

/// Error returned by [`push`](queue::ConcurrentQueue::push) when a bounded
/// engine is at capacity. The rejected value is handed back so the caller
/// can retry or reroute it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Recover the rejected value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> core::fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("Full(..)")
    }
}

impl<T> core::fmt::Display for Full<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T> std::error::Error for Full<T> {}

/// Error returned by the timed push wrapper when the deadline passes before
/// a slot frees up. The value is handed back untouched.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PushTimeout<T>(pub T);

impl<T> PushTimeout<T> {
    /// Recover the value that could not be pushed in time.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> core::fmt::Debug for PushTimeout<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("PushTimeout(..)")
    }
}

impl<T> core::fmt::Display for PushTimeout<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "push timed out")
    }
}

impl<T> std::error::Error for PushTimeout<T> {}

/// Best-effort utilization snapshot of a queue, computed from its
/// (possibly stale) counters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    /// Maximum capacity, or [`UNBOUNDED`].
    pub capacity: usize,
    /// Element count at snapshot time.
    pub len: usize,
    /// Whether the queue appeared empty.
    pub is_empty: bool,
    /// `len / capacity`, or `0.0` for unbounded engines.
    pub utilization: f64,
}
