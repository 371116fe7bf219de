//! The minimal reactive-streams-like contract `AckPublisher` is built on.
//!
//! A deliberately small subset of the reactive-streams protocol (Publisher /
//! Subscriber / Subscription), expressed as plain synchronous Rust traits
//! over threads rather than `futures::Stream` — there are no suspension
//! points anywhere in this crate's operations, so there is nothing for an
//! async runtime to do.

use std::sync::Arc;

use crate::error::CauseError;

/// A handle the subscriber uses to signal backpressure or give up.
pub trait Subscription: Send + Sync {
    /// Requests up to `n` further values from the upstream.
    fn request(&self, n: u64);
    /// Cancels the subscription; no further `on_next`/`on_complete`/`on_error`
    /// calls should follow, though a racing in-flight call may still land.
    fn cancel(&self);
}

/// Receives values, a terminal completion, or a terminal error from a
/// [`Publisher`].
pub trait Subscriber<T>: Send + Sync {
    /// Called once, before any `on_next`, with a handle back to the upstream.
    /// Default implementation ignores it — most subscribers in this crate
    /// don't need backpressure control.
    fn on_subscribe(&self, _subscription: Box<dyn Subscription>) {}
    /// Delivers the next value. Never called with a null/absent value —
    /// Rust's ownership model makes that precondition structural rather than
    /// something to check at runtime.
    fn on_next(&self, value: T);
    /// Terminal: the upstream has no more values and completed successfully.
    fn on_complete(&self);
    /// Terminal: the upstream failed.
    fn on_error(&self, err: CauseError);
}

/// A source of values that delivers them to at most one subscriber.
pub trait Publisher<T>: Send + Sync {
    /// Attaches `subscriber` to this publisher. Implementations that only
    /// support a single subscription (like [`crate::publisher::AckPublisher`])
    /// enforce that at the call site.
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber<T>>);
}
