//! Property-based checks for the quantified invariants in the ack-core
//! acceptance criteria: FIFO drain order and eventual completeness hold
//! regardless of the order downstream code happens to complete envelopes in.

use std::sync::Arc;

use ack_core::{AckQueue, OrderingPolicy};
use parking_lot::Mutex;
use proptest::prelude::*;

proptest! {
    /// Invariant 2 (FIFO drain): whatever order completions arrive in, the
    /// observed execute() sequence always equals insertion order.
    #[test]
    fn fifo_drain_order_is_insertion_order(perm in Just((0..16usize).collect::<Vec<_>>()).prop_shuffle()) {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
        let log = Arc::new(Mutex::new(Vec::<usize>::new()));

        let envs: Vec<_> = (0..16)
            .map(|i| {
                let log = Arc::clone(&log);
                queue.add(move || log.lock().push(i), |_| {})
            })
            .collect();

        for &i in &perm {
            queue.complete(&envs[i]);
        }

        prop_assert_eq!(log.lock().clone(), (0..16).collect::<Vec<_>>());
    }

    /// Invariant 3 (eventual completeness): if every inserted envelope is
    /// eventually completed, the sum of drained counts across all
    /// complete() calls equals the number of insertions.
    #[test]
    fn eventual_completeness_holds_for_any_completion_order(
        perm in Just((0..24usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
        let envs: Vec<_> = (0..24).map(|_| queue.add(|| {}, |_| {})).collect();

        let total: u64 = perm.iter().map(|&i| queue.complete(&envs[i])).sum();

        prop_assert_eq!(total, 24);
        prop_assert!(queue.is_empty());
    }
}
