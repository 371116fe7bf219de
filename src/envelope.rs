//! AckEnvelope — the per-message acknowledgement state machine
//!
//! Couples a payload with a positive acknowledger and a negative
//! acknowledger, and guarantees that together they fire **at most once**
//! across the envelope's lifetime, no matter how many threads race to
//! complete it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::CauseError;
use crate::sink::ErrorSink;

const IN_FLIGHT: u8 = 0;
const COMPLETED: u8 = 1;
const EXECUTED: u8 = 2;

type AckFn = Arc<dyn Fn() + Send + Sync>;
type NackFn = Arc<dyn Fn(CauseError) + Send + Sync>;

struct Inner<T> {
    value: T,
    ack: AckFn,
    nack: NackFn,
    state: AtomicU8,
    error: OnceLock<CauseError>,
}

/// Per-message state machine coupling a payload with its ack/nack callbacks.
///
/// Cheap to clone (an `Arc` handle) and safe to hold from multiple threads:
/// every observation of `state` is made via the envelope's own atomics, and
/// the callbacks fire at most once regardless of how many holders call
/// `acknowledge`/`nacknowledge` concurrently.
pub struct AckEnvelope<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AckEnvelope<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AckEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckEnvelope")
            .field("state", &self.state_label())
            .finish()
    }
}

impl<T> AckEnvelope<T> {
    /// Creates a new envelope in state `IN_FLIGHT` with no error.
    ///
    /// `ack` and `nack` are owned, non-`Option` closures — Rust's type
    /// system makes the "null ack/nack" precondition from the source design
    /// unrepresentable, rather than something to check at runtime.
    pub fn new(
        value: T,
        ack: impl Fn() + Send + Sync + 'static,
        nack: impl Fn(CauseError) + Send + Sync + 'static,
    ) -> Self {
        tracing::trace!("ack envelope created");
        Self {
            inner: Arc::new(Inner {
                value,
                ack: Arc::new(ack),
                nack: Arc::new(nack),
                state: AtomicU8::new(IN_FLIGHT),
                error: OnceLock::new(),
            }),
        }
    }

    /// The envelope's payload.
    pub fn get(&self) -> &T {
        &self.inner.value
    }

    /// Attempts `IN_FLIGHT -> COMPLETED`.
    ///
    /// Returns `true` iff this call performed the transition. A second
    /// `acknowledge`/`nacknowledge` on an already-completed envelope is a
    /// silent no-op (the "Redundant completion" case of `spec.md` §7).
    pub fn acknowledge(&self) -> bool {
        self.inner
            .state
            .compare_exchange(IN_FLIGHT, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Symmetric negative form.
    ///
    /// Sets `error` via a one-shot CAS-from-empty ([`OnceLock::set`]), then
    /// attempts `IN_FLIGHT -> COMPLETED`; returns `true` iff this call set
    /// *both*. The two steps are independent on purpose (`spec.md` §4.1,
    /// §9 — "the two separate CAS loops"): it is possible, under a genuine
    /// race with a concurrent `acknowledge()`, for this call to win the
    /// error slot while the other call wins the state transition. `execute`
    /// only ever consults the error slot, so in that rare interleaving the
    /// callback that actually fires is `nack`, even though a different call
    /// "won" the completion. This is the literal source behavior being
    /// reproduced, not a bug — see `DESIGN.md`.
    pub fn nacknowledge(&self, err: CauseError) -> bool {
        let error_set = self.inner.error.set(err).is_ok();
        let state_transitioned = self
            .inner
            .state
            .compare_exchange(IN_FLIGHT, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        error_set && state_transitioned
    }

    /// Atomically `? -> EXECUTED`; a no-op if already `EXECUTED`.
    ///
    /// Otherwise calls `ack` if no error was recorded, else `nack(error)`.
    /// Runs the callback under `catch_unwind` so a panicking callback body
    /// does not unwind through the caller (the drain loop, or the
    /// publisher's terminal-firing path); the panic is reported to `sink`
    /// instead and the envelope still ends up `EXECUTED`.
    pub fn execute(&self, sink: &dyn ErrorSink) {
        let previous = self.inner.state.swap(EXECUTED, Ordering::AcqRel);
        if previous == EXECUTED {
            return;
        }

        let outcome = match self.inner.error.get() {
            None => {
                let ack = Arc::clone(&self.inner.ack);
                catch_unwind(AssertUnwindSafe(|| ack()))
            }
            Some(err) => {
                let nack = Arc::clone(&self.inner.nack);
                let err = Arc::clone(err);
                catch_unwind(AssertUnwindSafe(|| nack(err)))
            }
        };

        if let Err(payload) = outcome {
            sink.on_error(panic_message(payload));
        }
    }

    /// Snapshot observation; may be stale by the time it is read. Callers
    /// that need correctness must re-check under their own synchronization
    /// (e.g. `AckQueue`'s drain loop re-reads this on every pass).
    pub fn is_in_flight(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == IN_FLIGHT
    }

    /// Pointer identity, used by `OrderingPolicy::Ordered` to decide whether
    /// a completing envelope is the current head of its queue.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state_label(&self) -> &'static str {
        match self.inner.state.load(Ordering::Relaxed) {
            IN_FLIGHT => "IN_FLIGHT",
            COMPLETED => "COMPLETED",
            _ => "EXECUTED",
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked with a non-string payload".to_string()
    }
}
