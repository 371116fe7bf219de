//! AckQueue — a thread-safe FIFO of in-flight acknowledgements
//!
//! Admits completions in any order but drains only its already-completed
//! prefix, using a lock-free single-drainer protocol: whichever thread
//! observes the drain token free runs the drain loop; every other thread
//! that completes an envelope concurrently just bumps a counter the active
//! drainer will reabsorb before it exits, so no envelope completion is ever
//! missed and no two threads ever run the drain loop body at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::envelope::AckEnvelope;
use crate::error::CauseError;
use crate::sink::{ErrorSink, NoopErrorSink};

/// Ordering policy governing when a completed envelope may be drained.
///
/// A tagged sum rather than a trait object or subclass hierarchy — the two
/// variants differ only in the single hook `AckQueue::may_drain`, so there is
/// no use for dynamic dispatch here (`spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// A completion may only promote the head; completing a non-head
    /// envelope leaves the drain to wait and does **not** mark the envelope
    /// `COMPLETED`. Strict FIFO release. Used where the emitter guarantees
    /// completions arrive in emission order (e.g. a single-threaded
    /// per-partition consumer).
    ///
    /// Non-head completions return a drained count of `0` without
    /// transitioning the envelope; callers must retry once the head has
    /// moved (see `DESIGN.md`'s Open Question resolution — this crate does
    /// not implement automatic replay-on-head-movement).
    Ordered,
    /// Any envelope may transition to `COMPLETED` independently; the drain
    /// releases the longest completed prefix. Weaker ordering, higher
    /// throughput.
    Unordered,
}

/// A thread-safe in-flight ledger of [`AckEnvelope`]s.
///
/// Generic over `T`, the optional payload carried by queue-constructed
/// envelopes. `spec.md`'s `add(ack, nack) -> Envelope` takes no value, so
/// `add` requires `T: Default`; most callers only need completion ordering
/// and use the default `AckQueue<()>`.
pub struct AckQueue<T = ()> {
    queue: Mutex<VecDeque<AckEnvelope<T>>>,
    drains_in_progress: CachePadded<AtomicI64>,
    policy: OrderingPolicy,
    sink: Arc<dyn ErrorSink>,
}

impl<T> AckQueue<T> {
    /// Creates an empty queue with the given ordering policy, discarding
    /// callback panics encountered while draining.
    pub fn new(policy: OrderingPolicy) -> Self {
        Self::with_error_sink(policy, Arc::new(NoopErrorSink))
    }

    /// Creates an empty queue that reports drain-time callback panics to
    /// `sink`.
    pub fn with_error_sink(policy: OrderingPolicy, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            drains_in_progress: CachePadded::new(AtomicI64::new(0)),
            policy,
            sink,
        }
    }

    /// The configured ordering policy.
    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Number of envelopes currently tracked (in-flight or completed but not
    /// yet drained).
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// `true` iff no envelopes are tracked.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl<T: Default> AckQueue<T> {
    /// Constructs an envelope, enqueues it at the tail, and returns it.
    /// Enqueue is strictly ordered: envelopes become visible to the drain
    /// loop in the order `add` was called.
    pub fn add(
        &self,
        ack: impl Fn() + Send + Sync + 'static,
        nack: impl Fn(CauseError) + Send + Sync + 'static,
    ) -> AckEnvelope<T> {
        let env = AckEnvelope::new(T::default(), ack, nack);
        self.queue.lock().push_back(env.clone());
        env
    }
}

impl<T> AckQueue<T> {
    /// Attempts to positively complete `env`; if the ordering policy admits
    /// it, runs a drain pass. Returns the number of envelopes executed on
    /// this call's drain pass (`0` if this call did not trigger one, or did
    /// not even mark `env` completed — see [`OrderingPolicy::Ordered`]).
    pub fn complete(&self, env: &AckEnvelope<T>) -> u64 {
        if self.may_drain(env, |e| e.acknowledge()) {
            self.drain()
        } else {
            0
        }
    }

    /// Symmetric negative form of [`AckQueue::complete`].
    pub fn complete_exceptionally(&self, env: &AckEnvelope<T>, err: CauseError) -> u64 {
        if self.may_drain(env, |e| e.nacknowledge(err)) {
            self.drain()
        } else {
            0
        }
    }

    /// The single protected hook distinguishing the two ordering policies:
    /// "may I drain now?"
    fn may_drain(&self, env: &AckEnvelope<T>, completer: impl FnOnce(&AckEnvelope<T>) -> bool) -> bool {
        match self.policy {
            OrderingPolicy::Unordered => completer(env),
            OrderingPolicy::Ordered => {
                let is_head = {
                    let guard = self.queue.lock();
                    guard.front().is_some_and(|head| head.same(env))
                };
                is_head && completer(env)
            }
        }
    }

    /// The canonical lock-free single-drainer pattern: only the thread that
    /// observes `drains_in_progress == 0` runs the loop body; every other
    /// concurrent caller just increments the counter and returns, trusting
    /// the active drainer to reabsorb that increment before it exits.
    fn drain(&self) -> u64 {
        if self.drains_in_progress.fetch_add(1, Ordering::AcqRel) != 0 {
            return 0;
        }

        let mut drained: u64 = 0;
        let mut missed: i64 = 1;
        loop {
            loop {
                let head = {
                    let mut guard = self.queue.lock();
                    match guard.front() {
                        Some(head) if !head.is_in_flight() => guard.pop_front(),
                        _ => None,
                    }
                };
                let Some(head) = head else { break };
                head.execute(self.sink.as_ref());
                drained += 1;
            }

            missed = self.drains_in_progress.fetch_sub(missed, Ordering::Release) - missed;
            if missed == 0 {
                break;
            }
        }

        tracing::debug!(drained, "ack queue drain pass complete");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::cause;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Clone)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn pair(
            &self,
            name: &str,
        ) -> (
            impl Fn() + Send + Sync + 'static,
            impl Fn(CauseError) + Send + Sync + 'static,
        ) {
            let ack_log = Arc::clone(&self.log);
            let ack_name = name.to_string();
            let nack_log = Arc::clone(&self.log);
            let nack_name = name.to_string();
            (
                move || ack_log.lock().push(format!("{ack_name}:ack")),
                move |_: CauseError| nack_log.lock().push(format!("{nack_name}:nack")),
            )
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    /// S1: insert {A,B,C}, complete C then A then B. Expected drained counts
    /// per call: 0, 1 (A), 2 (B,C); final execute order A, B, C.
    #[test]
    fn test_s1_unordered_out_of_order_completion() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
        let recorder = Recorder::new();
        let (a_ack, a_nack) = recorder.pair("A");
        let (b_ack, b_nack) = recorder.pair("B");
        let (c_ack, c_nack) = recorder.pair("C");
        let a = queue.add(a_ack, a_nack);
        let b = queue.add(b_ack, b_nack);
        let c = queue.add(c_ack, c_nack);

        assert_eq!(queue.complete(&c), 0);
        assert_eq!(queue.complete(&a), 1);
        assert_eq!(queue.complete(&b), 2);

        assert_eq!(
            recorder.log(),
            vec!["A:ack".to_string(), "B:ack".to_string(), "C:ack".to_string()]
        );
    }

    /// S2: insert {A,B,C}; nack B, then ack A, then ack C.
    /// Executed order A, B, C — 2 acks + 1 nack total.
    #[test]
    fn test_s2_unordered_mixed_ack_and_nack() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
        let recorder = Recorder::new();
        let (a_ack, a_nack) = recorder.pair("A");
        let (b_ack, b_nack) = recorder.pair("B");
        let (c_ack, c_nack) = recorder.pair("C");
        let a = queue.add(a_ack, a_nack);
        let b = queue.add(b_ack, b_nack);
        let c = queue.add(c_ack, c_nack);

        queue.complete_exceptionally(&b, cause("boom"));
        queue.complete(&a);
        queue.complete(&c);

        assert_eq!(
            recorder.log(),
            vec!["A:ack".to_string(), "B:nack".to_string(), "C:ack".to_string()]
        );
    }

    #[test]
    fn test_ordered_queue_rejects_non_head_completion() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Ordered);
        let recorder = Recorder::new();
        let (a_ack, a_nack) = recorder.pair("A");
        let (b_ack, b_nack) = recorder.pair("B");
        let a = queue.add(a_ack, a_nack);
        let b = queue.add(b_ack, b_nack);

        // B is not the head; completing it must not drain or mark it done.
        assert_eq!(queue.complete(&b), 0);
        assert!(b.is_in_flight());
        assert!(recorder.log().is_empty());

        // Per the documented contract, B was never actually marked COMPLETED,
        // so completing A only drains A.
        assert_eq!(queue.complete(&a), 1);
        assert_eq!(recorder.log(), vec!["A:ack".to_string()]);

        // B must be retried now that it is head.
        assert_eq!(queue.complete(&b), 1);
        assert_eq!(recorder.log(), vec!["A:ack".to_string(), "B:ack".to_string()]);
    }

    #[test]
    fn test_ordered_queue_strict_fifo_release() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Ordered);
        let recorder = Recorder::new();
        let mut envs = Vec::new();
        for name in ["A", "B", "C", "D"] {
            let (ack, nack) = recorder.pair(name);
            envs.push(queue.add(ack, nack));
        }

        // Completing in forward order is the only way to actually release
        // envelopes under `Ordered`; each call drains exactly the new head.
        for env in envs.iter() {
            queue.complete(env);
        }
        assert_eq!(
            recorder.log(),
            vec![
                "A:ack".to_string(),
                "B:ack".to_string(),
                "C:ack".to_string(),
                "D:ack".to_string()
            ]
        );
    }

    #[test]
    fn test_ordered_queue_reverse_completion_only_releases_head() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Ordered);
        let recorder = Recorder::new();
        let mut envs = Vec::new();
        for name in ["A", "B", "C", "D"] {
            let (ack, nack) = recorder.pair(name);
            envs.push(queue.add(ack, nack));
        }

        // Completing in reverse: D, C, B are never the head at the time they
        // complete, so per the documented "callers must retry" contract (no
        // replay-on-head-movement) they are never marked COMPLETED and stay
        // IN_FLIGHT. Only A, which is the head, actually drains.
        for env in envs.iter().rev() {
            queue.complete(env);
        }

        assert_eq!(recorder.log(), vec!["A:ack".to_string()]);
        assert!(envs[1].is_in_flight());
        assert!(envs[2].is_in_flight());
        assert!(envs[3].is_in_flight());
    }

    /// Q3 / "eventual completeness": if every inserted envelope is eventually
    /// completed, the sum of drained counts across all `complete*` calls
    /// equals the number of insertions.
    #[test]
    fn test_eventual_completeness_under_concurrency() {
        let queue: Arc<AckQueue<()>> = Arc::new(AckQueue::new(OrderingPolicy::Unordered));
        let n = 500;
        let envs: Vec<_> = (0..n).map(|_| queue.add(|| {}, |_| {})).collect();

        let total_drained: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = envs
            .into_iter()
            .map(|env| {
                let queue = Arc::clone(&queue);
                let total_drained = Arc::clone(&total_drained);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let drained = queue.complete(&env);
                    total_drained.fetch_add(drained as usize, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(total_drained.load(Ordering::SeqCst), n);
        assert!(queue.is_empty());
    }

    /// Q1 / single-drainer: an injected counter must never observe more than
    /// one concurrent drainer.
    #[test]
    fn test_single_drainer_invariant() {
        let queue: Arc<AckQueue<()>> = Arc::new(AckQueue::new(OrderingPolicy::Unordered));
        let concurrent_drainers = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let n = 200;

        let envs: Vec<_> = (0..n)
            .map(|_| {
                let concurrent_drainers = Arc::clone(&concurrent_drainers);
                let max_observed = Arc::clone(&max_observed);
                queue.add(
                    move || {
                        let now = concurrent_drainers.fetch_add(1, Ordering::SeqCst) + 1;
                        max_observed.fetch_max(now, Ordering::SeqCst);
                        // Give another thread a chance to (incorrectly) enter concurrently.
                        thread::yield_now();
                        concurrent_drainers.fetch_sub(1, Ordering::SeqCst);
                    },
                    |_| {},
                )
            })
            .collect();

        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = envs
            .into_iter()
            .map(|env| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    queue.complete(&env);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_panic_does_not_stop_drain() {
        let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
        let recorder = Recorder::new();
        let (a_ack, a_nack) = recorder.pair("A");
        let (c_ack, c_nack) = recorder.pair("C");
        let a = queue.add(a_ack, a_nack);
        let b = queue.add(|| panic!("boom"), |_| {});
        let c = queue.add(c_ack, c_nack);

        queue.complete(&a);
        queue.complete(&b);
        queue.complete(&c);

        assert_eq!(recorder.log(), vec!["A:ack".to_string(), "C:ack".to_string()]);
        assert!(queue.is_empty());
    }
}
