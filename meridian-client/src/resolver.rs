//! Bulk lock resolution contract.

use async_trait::async_trait;
use meridian_core::{Lock, RegionVerId, Result};
use meridian_flow::Backoffer;

/// Resolves a batch of locks that all live in one region.
#[async_trait]
pub trait LockResolver: Send + Sync {
    /// Commits or rolls back the transactions owning `locks`.
    ///
    /// Returns `Ok(false)` when only part of the batch could be resolved,
    /// typically because the locks no longer all live in `region`. That is
    /// not a failure: the caller re-locates and retries.
    ///
    /// # Errors
    ///
    /// Returns an error that the caller must not retry.
    async fn batch_resolve_locks(
        &self,
        bo: &mut Backoffer,
        locks: &[Lock],
        region: RegionVerId,
    ) -> Result<bool>;
}
