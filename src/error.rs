//! Error types for ack-core

use std::sync::Arc;
use thiserror::Error;

/// The underlying cause carried by a negative acknowledgement.
///
/// Boxed behind an `Arc` rather than a plain `Box` so the same cause can be
/// written once (via [`std::sync::OnceLock::set`]) and read many times —
/// from `execute()`, from a `DownstreamFailure`, and from whichever thread
/// observes the envelope afterwards.
pub type CauseError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the acknowledgement core
#[derive(Debug, Error)]
pub enum AckError {
    /// Programmer error: double subscribe, or any other violation of the
    /// reactive-streams protocol the core relies on (single subscription,
    /// non-null values).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An error supplied via `nacknowledge` or the upstream's `on_error`.
    /// Recorded on the envelope, surfaces to the source-level nack, and is
    /// forwarded downstream.
    #[error("downstream failure: {0}")]
    DownstreamFailure(#[source] CauseError),

    /// An `ack`/`nack` callback body itself panicked. Caught by the drain
    /// loop (or the publisher's terminal-firing path), reported to the
    /// configured [`crate::sink::ErrorSink`], and does not stop further
    /// draining — the envelope still ends up `EXECUTED`.
    #[error("callback panicked: {0}")]
    CallbackFailure(String),
}

/// Result type alias for acknowledgement-core operations
pub type Result<T> = std::result::Result<T, AckError>;

/// Convenience constructor for a [`CauseError`] from any displayable message.
///
/// Mirrors the `EventError::Connection(format!(...))` pattern this crate's
/// source lineage uses for ad hoc errors, but yields the `Arc<dyn Error>`
/// shape the envelope's one-shot error slot expects.
pub fn cause(msg: impl Into<String>) -> CauseError {
    #[derive(Debug)]
    struct Cause(String);
    impl std::fmt::Display for Cause {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }
    impl std::error::Error for Cause {}
    Arc::new(Cause(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_message() {
        let err = AckError::ProtocolViolation("already subscribed".to_string());
        assert_eq!(err.to_string(), "protocol violation: already subscribed");
    }

    #[test]
    fn test_cause_roundtrip() {
        let c = cause("boom");
        assert_eq!(c.to_string(), "boom");
    }

    #[test]
    fn test_downstream_failure_wraps_cause() {
        let c = cause("broker unreachable");
        let err = AckError::DownstreamFailure(c.clone());
        assert!(err.to_string().contains("broker unreachable"));
    }
}
