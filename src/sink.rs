//! Error sink — the collaborator invoked when an `ack`/`nack` callback panics
//! during a drain pass or a publisher's terminal-firing path.
//!
//! Mirrors the "Error sink (optional): a consumer of Throwable invoked when a
//! callback throws during drain. Default: discard." contract from `spec.md`
//! §6, and the `tracing::warn!`/`tracing::debug!` call sites this crate's
//! source lineage uses for non-fatal, logged-and-continue failures.

/// Receives a description of a callback panic caught during `AckEnvelope::execute`.
///
/// Implementations must not panic themselves and should return promptly —
/// they run on whichever thread happened to be draining at the time.
pub trait ErrorSink: Send + Sync {
    /// Called with a human-readable description of the panic payload.
    fn on_error(&self, message: String);
}

/// Discards callback failures. The default when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorSink;

impl ErrorSink for NoopErrorSink {
    fn on_error(&self, _message: String) {}
}

/// Reports callback failures via `tracing::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn on_error(&self, message: String) {
        tracing::error!(callback.panic = %message, "ack/nack callback panicked during drain");
    }
}
