//! MVCC lock records left behind by in-flight or abandoned transactions.

use crate::key::Key;
use crate::types::Timestamp;

/// An outstanding MVCC lock.
///
/// Produced by a scan-lock request and consumed by lock resolution, which
/// either commits or rolls back the owning transaction's write at `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// The locked key.
    pub key: Key,
    /// The primary key of the owning transaction.
    pub primary: Key,
    /// Start timestamp of the owning transaction.
    pub txn_start_ts: Timestamp,
    /// Lock time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Number of keys written by the owning transaction, if known.
    pub txn_size: u64,
}

impl Lock {
    /// Creates a lock record.
    #[must_use]
    pub fn new(key: impl Into<Key>, primary: impl Into<Key>, txn_start_ts: Timestamp) -> Self {
        Self {
            key: key.into(),
            primary: primary.into(),
            txn_start_ts,
            ttl_ms: 0,
            txn_size: 0,
        }
    }

    /// Sets the lock TTL.
    #[must_use]
    pub const fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Returns true if this lock is old enough to be resolved at `safe_point`.
    #[must_use]
    pub fn is_at_or_below(&self, safe_point: Timestamp) -> bool {
        self.txn_start_ts <= safe_point
    }
}
