//! AckPublisher — a single-subscription reactive adapter
//!
//! Wraps an upstream [`Publisher<T>`], re-emits each value inside an
//! [`AckEnvelope`], tracks unacknowledged emissions by opaque handle, and
//! fires a source-level ack (or nack) exactly once: ack when the upstream
//! terminates normally and every emitted envelope has resolved; nack, with
//! the first observed error, otherwise.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::envelope::AckEnvelope;
use crate::error::{cause, AckError, CauseError, Result};
use crate::reactive::{Publisher, Subscriber, Subscription};

const ACTIVE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const EXECUTED: u8 = 2;

type SrcAckFn = Arc<dyn Fn() + Send + Sync>;
type SrcNackFn = Arc<dyn Fn(CauseError) + Send + Sync>;

struct Inner<T> {
    upstream: Mutex<Option<Box<dyn Publisher<T>>>>,
    upstream_subscription: Mutex<Option<Box<dyn Subscription>>>,
    downstream: OnceLock<Arc<dyn Subscriber<AckEnvelope<T>>>>,
    src_ack: SrcAckFn,
    src_nack: SrcNackFn,
    unacknowledged: Mutex<HashSet<u64>>,
    next_handle: AtomicU64,
    state: AtomicU8,
    subscribed_once: AtomicBool,
}

/// Single-subscription adapter from a `Publisher<T>` to a `Publisher<AckEnvelope<T>>`.
///
/// Cheap to clone (an `Arc` handle to shared state) — this is what lets the
/// adapter hand itself to the upstream as its own subscriber while also
/// exposing an inherent `subscribe` with a synchronous `Result` return,
/// rather than forcing the one-shot-consuming `Box<Self>` of the
/// [`Publisher`] trait to be the only way to enforce single subscription.
/// See `DESIGN.md` for why this is a deliberate deviation from a literal
/// `self: Box<Self>` reading of the trait.
pub struct AckPublisher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AckPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> AckPublisher<T> {
    /// Wraps `upstream`, firing `src_ack`/`src_nack` per the terminal rules
    /// in this module's doc comment.
    pub fn new(
        upstream: Box<dyn Publisher<T>>,
        src_ack: impl Fn() + Send + Sync + 'static,
        src_nack: impl Fn(CauseError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                upstream: Mutex::new(Some(upstream)),
                upstream_subscription: Mutex::new(None),
                downstream: OnceLock::new(),
                src_ack: Arc::new(src_ack),
                src_nack: Arc::new(src_nack),
                unacknowledged: Mutex::new(HashSet::new()),
                next_handle: AtomicU64::new(0),
                state: AtomicU8::new(ACTIVE),
                subscribed_once: AtomicBool::new(false),
            }),
        }
    }

    /// Attaches `downstream`. Permitted exactly once per publisher; a second
    /// call returns `Err(AckError::ProtocolViolation)` without disturbing the
    /// first subscription, and also reports the error to `downstream` via
    /// `on_error` since the downstream has no other way to observe the
    /// rejection.
    pub fn subscribe(&self, downstream: Arc<dyn Subscriber<AckEnvelope<T>>>) -> Result<()> {
        if self.inner.subscribed_once.swap(true, Ordering::AcqRel) {
            let err = AckError::ProtocolViolation("AckPublisher already subscribed".to_string());
            downstream.on_error(cause(err.to_string()));
            return Err(err);
        }

        let _ = self.inner.downstream.set(downstream);
        let upstream = self
            .inner
            .upstream
            .lock()
            .take()
            .expect("subscribed_once guarantees this runs at most once");
        let subscriber: Arc<dyn Subscriber<T>> = Arc::new(self.clone());
        upstream.subscribe(subscriber);
        Ok(())
    }

    /// Cancels the upstream subscription, then — mirroring `on_complete` —
    /// attempts `ACTIVE -> IN_FLIGHT` and a terminal ack, so a downstream
    /// that stops consuming still completes its already-emitted work.
    /// Pending envelopes are not auto-nacked by cancellation.
    pub fn cancel(&self) {
        if let Some(sub) = self.inner.upstream_subscription.lock().as_ref() {
            sub.cancel();
        }
        if self
            .inner
            .state
            .compare_exchange(ACTIVE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            maybe_fire_src_ack(&self.inner);
        }
    }
}

impl<T: Send + Sync + 'static> Subscriber<T> for AckPublisher<T> {
    fn on_subscribe(&self, subscription: Box<dyn Subscription>) {
        *self.inner.upstream_subscription.lock() = Some(subscription);
        if let Some(downstream) = self.inner.downstream.get() {
            downstream.on_subscribe(Box::new(DownstreamSubscription {
                publisher: self.clone(),
            }));
        }
    }

    fn on_next(&self, value: T) {
        let handle = self.inner.next_handle.fetch_add(1, Ordering::AcqRel);
        {
            let mut unacked = self.inner.unacknowledged.lock();
            if self.inner.state.load(Ordering::Acquire) == ACTIVE {
                unacked.insert(handle);
            }
        }

        let ack_inner = Arc::clone(&self.inner);
        let nack_inner = Arc::clone(&self.inner);
        let envelope = AckEnvelope::new(
            value,
            move || {
                ack_inner.unacknowledged.lock().remove(&handle);
                maybe_fire_src_ack(&ack_inner);
            },
            move |err| maybe_fire_src_nack(&nack_inner, err),
        );

        if let Some(downstream) = self.inner.downstream.get() {
            downstream.on_next(envelope);
        }
    }

    fn on_complete(&self) {
        if self
            .inner
            .state
            .compare_exchange(ACTIVE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            maybe_fire_src_ack(&self.inner);
        }
        if let Some(downstream) = self.inner.downstream.get() {
            downstream.on_complete();
        }
    }

    fn on_error(&self, err: CauseError) {
        maybe_fire_src_nack(&self.inner, Arc::clone(&err));
        if let Some(downstream) = self.inner.downstream.get() {
            downstream.on_error(err);
        }
    }
}

impl<T: Send + Sync + 'static> Publisher<AckEnvelope<T>> for AckPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber<AckEnvelope<T>>>) {
        let _ = AckPublisher::subscribe(&self, subscriber);
    }
}

struct DownstreamSubscription<T> {
    publisher: AckPublisher<T>,
}

impl<T: Send + Sync + 'static> Subscription for DownstreamSubscription<T> {
    fn request(&self, n: u64) {
        if let Some(sub) = self.publisher.inner.upstream_subscription.lock().as_ref() {
            sub.request(n);
        }
    }

    fn cancel(&self) {
        self.publisher.cancel();
    }
}

/// Fires `src_ack` iff `unacknowledged` is empty and this call wins
/// `IN_FLIGHT -> EXECUTED`. Called both from the ack side of every emitted
/// envelope and from `on_complete`/`cancel`, since either may be the one
/// that observes both conditions true.
fn maybe_fire_src_ack<T>(inner: &Inner<T>) {
    if inner.unacknowledged.lock().is_empty()
        && inner
            .state
            .compare_exchange(IN_FLIGHT, EXECUTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        tracing::info!("ack publisher firing terminal src_ack");
        (inner.src_ack)();
    }
}

/// Fires `src_nack` iff this call wins the transition to `EXECUTED` from
/// whatever state the publisher was in (`ACTIVE` or `IN_FLIGHT` — a nack can
/// arrive before `on_complete` observes the upstream finished). Mutually
/// exclusive with `maybe_fire_src_ack` by construction: only one caller can
/// ever observe `previous != EXECUTED` on the state that ends up `EXECUTED`.
fn maybe_fire_src_nack<T>(inner: &Inner<T>, err: CauseError) {
    let previous = inner.state.swap(EXECUTED, Ordering::AcqRel);
    if previous != EXECUTED {
        inner.unacknowledged.lock().clear();
        tracing::warn!(error = %err, "ack publisher firing terminal src_nack");
        (inner.src_nack)(err);
    }
}
