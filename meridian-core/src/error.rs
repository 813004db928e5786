//! Error types for Meridian client operations.
//!
//! Topology errors (region miss, stale epoch) are retryable and are normally
//! absorbed by a backoff loop. Protocol violations, cancellation and
//! exhausted retry budgets are what surface to callers.

use thiserror::Error;

use crate::key::Key;
use crate::region::RegionVerId;
use crate::types::RegionId;

/// The result type for Meridian operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Meridian operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A region rejected a request because the caller's view of it is stale
    /// (epoch mismatch, region moved, not leader, ...).
    #[error("region error on {region}: {message}")]
    RegionError {
        /// The region the request was addressed to.
        region: RegionVerId,
        /// Description reported by the region.
        message: String,
    },

    /// No region currently covers the key.
    #[error("no region found for key {key}")]
    RegionNotFound {
        /// The key being located.
        key: Key,
    },

    /// A response arrived without a body.
    #[error("response body missing for {request}")]
    BodyMissing {
        /// The request kind.
        request: &'static str,
    },

    /// A response body of the wrong kind arrived.
    #[error("unexpected response: expected {expected}")]
    UnexpectedResponse {
        /// The expected response kind.
        expected: &'static str,
    },

    /// The storage node reported a key-level error in the response body.
    #[error("key error in {request}: {message}")]
    KeyError {
        /// The request kind.
        request: &'static str,
        /// Error message.
        message: String,
    },

    /// A transport or RPC failure.
    #[error("rpc {operation} failed: {message}")]
    Rpc {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The placement service returned an error.
    #[error("placement service error: {message}")]
    Placement {
        /// Error message.
        message: String,
    },

    /// The placement service timed out serving the request.
    #[error("placement service timeout: {message}")]
    PlacementTimeout {
        /// Error message.
        message: String,
    },

    /// A region is still being scattered.
    #[error("{region_id} is still scattering")]
    ScatterInProgress {
        /// The region being waited on.
        region_id: RegionId,
    },

    /// Some locks stayed unresolved after a resolve attempt.
    #[error("{remaining} locks remain unresolved")]
    LocksNotResolved {
        /// Number of locks in the failed attempt.
        remaining: usize,
    },

    /// The operation was cancelled.
    #[error("{operation} cancelled")]
    Cancelled {
        /// What operation was cancelled.
        operation: &'static str,
    },

    /// The retry budget ran out.
    #[error("backoff budget of {max_sleep_ms}ms exhausted after sleeping {total_sleep_ms}ms: {source}")]
    BackoffExhausted {
        /// The configured budget.
        max_sleep_ms: u64,
        /// Total time slept before giving up.
        total_sleep_ms: u64,
        /// The error that triggered the final backoff.
        #[source]
        source: Box<Error>,
    },

    /// A spawned task failed unexpectedly (panicked or was aborted).
    #[error("task {task} failed: {message}")]
    TaskFailed {
        /// The task label.
        task: &'static str,
        /// Failure description.
        message: String,
    },
}

impl Error {
    /// Returns true for topology and transient errors that a backoff loop
    /// should absorb.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RegionError { .. }
                | Self::RegionNotFound { .. }
                | Self::Rpc { .. }
                | Self::Placement { .. }
                | Self::ScatterInProgress { .. }
                | Self::LocksNotResolved { .. }
        )
    }

    /// Returns true if this error, or the error that exhausted a backoff
    /// budget, is a placement service timeout.
    #[must_use]
    pub fn is_placement_timeout(&self) -> bool {
        match self {
            Self::PlacementTimeout { .. } => true,
            Self::BackoffExhausted { source, .. } => source.is_placement_timeout(),
            _ => false,
        }
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if a retry budget ran out.
    #[must_use]
    pub const fn is_backoff_exhausted(&self) -> bool {
        matches!(self, Self::BackoffExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Cancelled { operation: "gc job" };
        assert_eq!(format!("{err}"), "gc job cancelled");
    }

    #[test]
    fn test_exhausted_display_includes_source() {
        let err = Error::BackoffExhausted {
            max_sleep_ms: 100,
            total_sleep_ms: 120,
            source: Box::new(Error::ScatterInProgress {
                region_id: RegionId::new(4),
            }),
        };
        let msg = format!("{err}");
        assert!(msg.contains("100ms"));
        assert!(msg.contains("region-4 is still scattering"));
    }

    #[test]
    fn test_placement_timeout_seen_through_exhaustion() {
        let timeout = Error::PlacementTimeout {
            message: "deadline".into(),
        };
        assert!(timeout.is_placement_timeout());

        let exhausted = Error::BackoffExhausted {
            max_sleep_ms: 10,
            total_sleep_ms: 10,
            source: Box::new(timeout),
        };
        assert!(exhausted.is_placement_timeout());
        assert!(!Error::Placement { message: "x".into() }.is_placement_timeout());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RegionNotFound { key: Key::from("a") }.is_retryable());
        assert!(!Error::BodyMissing { request: "scan_lock" }.is_retryable());
        assert!(!Error::Cancelled { operation: "gc" }.is_retryable());
    }
}
