//! Cluster-wide lock resolution and GC.
//!
//! GC walks the whole keyspace, resolving every lock whose transaction
//! started at or below the safe point, and only then asks the placement
//! service to advance the safe point. Region boundaries may move while the
//! sweep runs; the sweep re-locates and rescans rather than trusting a
//! stale view.

use std::sync::Arc;

use meridian_core::{Error, Key, KeyLocation, KeyRange, Lock, Result, Timestamp};
use meridian_flow::{BackoffKind, Backoffer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::range_task::{RangeTaskRunner, RangeTaskStat};
use crate::rpc::{Request, ScanLockRequest};
use crate::store::KvStore;

/// Outcome of resolving one page of locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Every lock was resolved in this region.
    Resolved(KeyLocation),
    /// The locks no longer share a region; scan again from the same key.
    Rescan,
}

impl KvStore {
    /// Resolves every lock at or below `safe_point` and then advances the
    /// cluster GC safe point to it.
    ///
    /// Returns the safe point recorded by the placement service.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep fails or is cancelled, in which case the
    /// safe point is left untouched.
    pub async fn gc(&self, cancel: &CancellationToken, safe_point: Timestamp) -> Result<Timestamp> {
        let concurrency = self.config().gc.concurrency;
        let stat = self.resolve_locks(cancel, safe_point, concurrency).await?;

        let new_safe_point = self.placement().update_gc_safe_point(safe_point).await?;
        info!(
            safe_point = safe_point.get(),
            new_safe_point = new_safe_point.get(),
            completed_regions = stat.completed_regions,
            "gc finished"
        );
        Ok(new_safe_point)
    }

    /// Resolves every lock at or below `safe_point` across the keyspace,
    /// sweeping up to `concurrency` sub-ranges at once.
    ///
    /// # Errors
    ///
    /// Returns the first sub-range failure.
    pub async fn resolve_locks(
        &self,
        cancel: &CancellationToken,
        safe_point: Timestamp,
        concurrency: usize,
    ) -> Result<RangeTaskStat> {
        let runner = RangeTaskRunner::new("resolve-locks-runner", concurrency)
            .with_regions_per_task(self.config().gc.regions_per_task)
            .with_backoff_config(Arc::new(self.config().backoff.clone()));

        runner
            .run_on_range(self.locator(), cancel, KeyRange::full(), |cancel, range| {
                let store = self.clone();
                async move {
                    store
                        .resolve_locks_for_range(&cancel, safe_point, range.start, range.end)
                        .await
                }
            })
            .await
    }

    /// Resolves every lock at or below `safe_point` in `[start_key, end_key)`.
    ///
    /// An empty `end_key` sweeps to the end of the keyspace.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `cancel` fires, or the error that ended
    /// an iteration's backoff budget.
    pub async fn resolve_locks_for_range(
        &self,
        cancel: &CancellationToken,
        safe_point: Timestamp,
        start_key: Key,
        end_key: Key,
    ) -> Result<RangeTaskStat> {
        let range = KeyRange::new(start_key, end_key);
        let limit = self.config().gc.scan_lock_limit;
        let page = usize::try_from(limit).unwrap_or(usize::MAX);
        let budget = self.config().gc.resolve_lock_max_backoff_ms;

        let mut stat = RangeTaskStat::default();
        let mut key = range.start.clone();
        let mut bo = self.backoffer(cancel, budget);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { operation: "gc job" });
            }

            let (locks, loc) = self
                .scan_locks_in_region(&mut bo, &key, safe_point, limit)
                .await?;

            let resolved = match self
                .batch_resolve_locks_in_region(&mut bo, &locks, loc.clone())
                .await?
            {
                ResolveOutcome::Resolved(resolved) => resolved,
                ResolveOutcome::Rescan => continue,
            };

            if locks.len() < page {
                stat.completed_regions += 1;
                key = loc.end_key;
                info!(
                    region_id = resolved.region_id().get(),
                    resolved_locks = locks.len(),
                    "region drained"
                );
            } else {
                info!(
                    region_id = resolved.region_id().get(),
                    resolved_locks = locks.len(),
                    scan_lock_limit = limit,
                    "region has more locks than the scan limit"
                );
                // Pages are full, so the slice is non-empty.
                key = locks[locks.len() - 1].key.clone();
            }

            if range.is_exhausted_at(key.as_bytes()) {
                return Ok(stat);
            }
            bo = self.backoffer(cancel, budget);
        }
    }

    /// Scans one page of locks starting at `start_key` in the region that
    /// owns it.
    ///
    /// Region errors are absorbed by re-locating under `bo`.
    async fn scan_locks_in_region(
        &self,
        bo: &mut Backoffer,
        start_key: &Key,
        max_version: Timestamp,
        limit: u32,
    ) -> Result<(Vec<Lock>, KeyLocation)> {
        loop {
            let loc = self.locator().locate_key(bo, start_key.as_bytes()).await?;
            let request = Request::ScanLock(ScanLockRequest {
                max_version,
                limit,
                start_key: start_key.clone(),
                end_key: loc.end_key.clone(),
            });

            let mut response = self
                .sender()
                .send(bo, request, loc.region, self.config().timeouts.scan_lock)
                .await?;

            if let Some(message) = response.region_error.take() {
                debug!(region = %loc.region, message = %message, "scan lock hit region error");
                self.locator().invalidate_region(loc.region);
                bo.backoff(
                    BackoffKind::RegionMiss,
                    Error::RegionError {
                        region: loc.region,
                        message,
                    },
                )
                .await?;
                continue;
            }

            let body = response.into_scan_lock()?;
            return Ok((body.locks, loc));
        }
    }

    /// Resolves `locks`, which were all scanned from `loc`.
    ///
    /// Returns [`ResolveOutcome::Rescan`] if a partial resolution reveals the
    /// locks now span more than one region.
    async fn batch_resolve_locks_in_region(
        &self,
        bo: &mut Backoffer,
        locks: &[Lock],
        loc: KeyLocation,
    ) -> Result<ResolveOutcome> {
        let (Some(first), Some(last)) = (locks.first(), locks.last()) else {
            return Ok(ResolveOutcome::Resolved(loc));
        };

        let mut loc = loc;
        loop {
            if self
                .resolver()
                .batch_resolve_locks(bo, locks, loc.region)
                .await?
            {
                return Ok(ResolveOutcome::Resolved(loc));
            }

            bo.backoff(
                BackoffKind::TxnLock,
                Error::LocksNotResolved {
                    remaining: locks.len(),
                },
            )
            .await?;

            self.locator().invalidate_region(loc.region);
            let fresh = self.locator().locate_key(bo, first.key.as_bytes()).await?;
            if !fresh.contains(last.key.as_bytes()) {
                debug!(
                    region = %fresh.region,
                    lock_count = locks.len(),
                    "locks span regions, rescanning"
                );
                return Ok(ResolveOutcome::Rescan);
            }
            loc = fresh;
        }
    }
}
