//! # ack-core
//!
//! Lock-free, at-most-once acknowledgement core for reactive brokered-stream
//! consumers (Kafka partitions, AMQP queues, SQS queues).
//!
//! Consumers of such brokers must commit/acknowledge message positions only
//! after downstream work completes, but downstream pipelines emit, fork,
//! batch, and reorder messages arbitrarily. This crate accepts out-of-order
//! completion signals from concurrent downstream stages while surfacing
//! in-order acknowledgement to the broker, and guarantees that any single
//! message's acknowledgement or negative acknowledgement runs at most once,
//! even under races between completion, cancellation, and stream errors.
//!
//! ## Quick start
//!
//! ```rust
//! use ack_core::{AckQueue, OrderingPolicy};
//!
//! let queue: AckQueue<()> = AckQueue::new(OrderingPolicy::Unordered);
//! let envelope = queue.add(|| println!("acked"), |err| eprintln!("nacked: {err}"));
//! let drained = queue.complete(&envelope);
//! assert_eq!(drained, 1);
//! ```
//!
//! ## Components
//!
//! - [`AckEnvelope`] — per-message state machine coupling a payload with its
//!   ack/nack callbacks, firing at most one of them exactly once.
//! - [`AckQueue`] — thread-safe in-flight ledger that admits completions in
//!   any order but releases them to a single drainer, under one of two
//!   [`OrderingPolicy`] variants.
//! - [`AckPublisher`] — single-subscription adapter that wraps an upstream
//!   [`reactive::Publisher`], tracks pending envelopes, and fires a
//!   source-level ack or nack exactly once per subscription.
//!
//! This crate performs no I/O and has no suspension points: every operation
//! is synchronous and may be called from any thread.

pub mod envelope;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod reactive;
pub mod sink;

pub use envelope::AckEnvelope;
pub use error::{AckError, CauseError, Result};
pub use publisher::AckPublisher;
pub use queue::{AckQueue, OrderingPolicy};
pub use reactive::{Publisher, Subscriber, Subscription};
pub use sink::{ErrorSink, NoopErrorSink, TracingErrorSink};
