//! Queue implementations
//!
//! This module provides the four lock-free FIFO engines plus a mutex-based
//! reference queue, all behind the uniform [`ConcurrentQueue`] contract.
//!
//! ## Choosing an engine
//!
//! | Engine | Bound | Memory | Contention profile |
//! |--------|-------|--------|--------------------|
//! | [`RingSlotQueue`] | fixed | one allocation | low, all threads on one cursor pair |
//! | [`LinkedQueue`] | unbounded | node per element | medium, head/tail CAS |
//! | [`ChainQueue`] | unbounded | segment per ~2^k elements | low amortized allocation |
//! | [`ShardRouter`] | per backing engine | N sub-queues | spread over N cursor pairs |
//! | [`MutexQueue`] | unbounded | `VecDeque` | serialized; reference only |
//!
//! ## Try semantics
//!
//! Every engine is non-blocking: `push` on a full bounded queue and `pop`
//! on an empty queue return immediately. A `pop` racing a `push` that has
//! claimed a slot but not yet published its value reports *empty*; this
//! weak-empty behavior is deliberate (producers advance their cursor before
//! the value write finishes so they never serialize on store latency) and
//! is part of the contract, not a bug. Callers wanting to wait use the
//! `*_timeout` wrappers, which poll with exponential backoff.
//!
//! ## Example
//!
//! ```rust
//! use fluxq::queue::{ChainQueue, ConcurrentQueue};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(ChainQueue::new());
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let queue = Arc::clone(&queue);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 queue.push(t * 100 + i).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(queue.len(), 400);
//! ```

use crate::{Full, QueueStats};

pub mod chain;
pub mod linked;
pub mod reference;
pub mod ring;
pub mod shard;

pub use chain::ChainQueue;
pub use linked::LinkedQueue;
pub use reference::MutexQueue;
pub use ring::RingSlotQueue;
pub use shard::ShardRouter;

/// Default capacity used by bounded constructors when none is given.
pub const DEFAULT_CAPACITY: usize = 1 << 8;

/// The uniform contract shared by every engine in this crate.
///
/// All methods are non-blocking. `len`, `is_empty` and `is_full` are
/// best-effort instantaneous reads that may be stale the moment they
/// return; they are exact only at quiescent points (no in-flight
/// operations).
pub trait ConcurrentQueue<T: Send>: Send + Sync {
    /// Append a value. Bounded engines hand the value back in
    /// [`Full`] when at capacity; unbounded engines never fail.
    fn push(&self, value: T) -> Result<(), Full<T>>;

    /// Remove and return the oldest value, or `None` when the queue is
    /// (weakly) empty.
    fn pop(&self) -> Option<T>;

    /// Best-effort element count.
    fn len(&self) -> usize;

    /// Best-effort emptiness check.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort fullness check; always `false` for unbounded engines.
    fn is_full(&self) -> bool;

    /// Fixed capacity for bounded engines, [`crate::UNBOUNDED`] otherwise.
    fn capacity(&self) -> usize;

    /// Snapshot of the queue's utilization counters.
    fn stats(&self) -> QueueStats {
        let capacity = self.capacity();
        let len = self.len();
        QueueStats {
            capacity,
            len,
            is_empty: len == 0,
            utilization: if capacity == crate::UNBOUNDED || capacity == 0 {
                0.0
            } else {
                len as f64 / capacity as f64
            },
        }
    }
}


#[cfg(test)]
mod proptests;
