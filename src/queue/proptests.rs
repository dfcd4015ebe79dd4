//! Property-based tests
//!
//! Model-checks each engine against a `VecDeque` under randomized
//! single-threaded operation scripts, where every engine must behave
//! exactly like the model.

use std::collections::VecDeque;

use proptest::prelude::*;

use crate::queue::{ChainQueue, ConcurrentQueue, LinkedQueue, RingSlotQueue, ShardRouter};

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Pop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => any::<u32>().prop_map(Op::Push),
        1 => Just(Op::Pop),
    ]
}

/// Replay a script against an engine and a bounded `VecDeque` model.
fn run_script<Q: ConcurrentQueue<u32>>(queue: &Q, model_capacity: usize, ops: &[Op]) {
    let mut model: VecDeque<u32> = VecDeque::new();

    for op in ops {
        match op {
            Op::Push(v) => {
                let accepted = queue.push(*v).is_ok();
                let model_accepted = model.len() < model_capacity;
                if model_accepted {
                    model.push_back(*v);
                }
                assert_eq!(accepted, model_accepted);
            }
            Op::Pop => {
                assert_eq!(queue.pop(), model.pop_front());
            }
        }
        assert_eq!(queue.len(), model.len());
        assert_eq!(queue.is_empty(), model.is_empty());
    }

    // Drain both; remaining contents must match in order.
    while let Some(expected) = model.pop_front() {
        assert_eq!(queue.pop(), Some(expected));
    }
    assert_eq!(queue.pop(), None);
}

proptest! {
    #[test]
    fn prop_ring_matches_model(
        capacity_pow in 1u32..8,
        ops in prop::collection::vec(op_strategy(), 0..400),
    ) {
        let capacity = 1usize << capacity_pow;
        let queue = RingSlotQueue::with_capacity(capacity);
        run_script(&queue, capacity, &ops);
    }

    #[test]
    fn prop_linked_matches_model(ops in prop::collection::vec(op_strategy(), 0..400)) {
        let queue = LinkedQueue::new();
        run_script(&queue, usize::MAX, &ops);
    }

    #[test]
    fn prop_chain_matches_model(ops in prop::collection::vec(op_strategy(), 0..400)) {
        let queue = ChainQueue::new();
        run_script(&queue, usize::MAX, &ops);
    }

    #[test]
    fn prop_router_matches_model(ops in prop::collection::vec(op_strategy(), 0..400)) {
        let queue = ShardRouter::new();
        run_script(&queue, usize::MAX, &ops);
    }

    #[test]
    fn prop_ring_len_never_exceeds_capacity(
        capacity_pow in 1u32..6,
        ops in prop::collection::vec(op_strategy(), 0..200),
    ) {
        let capacity = 1usize << capacity_pow;
        let queue = RingSlotQueue::with_capacity(capacity);
        for op in &ops {
            match op {
                Op::Push(v) => { let _ = queue.push(*v); }
                Op::Pop => { let _ = queue.pop(); }
            }
            prop_assert!(queue.len() <= capacity);
        }
    }

    #[test]
    fn prop_chain_grows_monotonically(count in 1usize..5_000) {
        let queue = ChainQueue::new();
        for i in 0..count {
            queue.push(i).unwrap();
        }
        // Segment capacities double up to the growth bound.
        let capacities = queue.segment_capacities();
        for pair in capacities.windows(2) {
            prop_assert_eq!(pair[1], pair[0] * 2);
        }
        prop_assert!(capacities.iter().sum::<usize>() >= count);
    }

    #[test]
    fn prop_router_round_robin(count in 0usize..256) {
        let router = ShardRouter::with_shards(8, LinkedQueue::new);
        for i in 0..count {
            router.push(i).unwrap();
        }
        let lens = router.shard_lens();
        for (shard, len) in lens.iter().enumerate() {
            // k-th push lands in shard k mod 8.
            let expected = count / 8 + usize::from(shard < count % 8);
            prop_assert_eq!(*len, expected);
        }
    }

    #[test]
    fn prop_full_returns_value(values in prop::collection::vec(any::<u32>(), 1..64)) {
        let capacity = 4;
        let queue = RingSlotQueue::with_capacity(capacity);
        for (i, v) in values.iter().enumerate() {
            match queue.push(*v) {
                Ok(()) => prop_assert!(i < capacity),
                Err(full) => prop_assert_eq!(full.into_inner(), *v),
            }
        }
    }
}
