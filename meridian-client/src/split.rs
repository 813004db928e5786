//! Region split orchestration.
//!
//! Split keys are grouped by the region that owns them, cut into batches of
//! at most `split.batch_limit` keys, and sent one request per batch. With
//! more than one batch every batch runs as its own task with a forked
//! backoffer. A batch that lands on a stale region is regrouped from
//! scratch, since the keys may now belong to several regions.

use futures::future::{BoxFuture, FutureExt};
use meridian_core::{Error, Key, Region, RegionId, RegionVerId, Result};
use meridian_flow::{BackoffKind, Backoffer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::rpc::{Request, Response, SplitRegionRequest};
use crate::store::KvStore;
use crate::task::TaskGroup;

/// Split keys bound for one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The region the keys fell into when grouped.
    pub region: RegionVerId,
    /// Split keys, at most the batch limit.
    pub keys: Vec<Key>,
}

/// Appends `keys` to `batches` in chunks of at most `limit` keys.
pub fn append_key_batches(
    batches: &mut Vec<Batch>,
    region: RegionVerId,
    keys: Vec<Key>,
    limit: usize,
) {
    let limit = limit.max(1);
    let mut keys = keys.into_iter().peekable();
    while keys.peek().is_some() {
        batches.push(Batch {
            region,
            keys: keys.by_ref().take(limit).collect(),
        });
    }
}

/// How a split response should be handled.
#[derive(Debug)]
pub enum SplitAttempt {
    /// The region was split into these regions.
    Split(Vec<Region>),
    /// The region was stale; regroup the keys and try again.
    RetryWithFreshGroup(Error),
    /// The batch failed for good.
    Fatal(Error),
}

/// Classifies the result of sending a split request to `region`.
#[must_use]
pub fn classify_split_response(outcome: Result<Response>, region: RegionVerId) -> SplitAttempt {
    let mut response = match outcome {
        Ok(response) => response,
        Err(err) => return SplitAttempt::Fatal(err),
    };
    if let Some(message) = response.region_error.take() {
        return SplitAttempt::RetryWithFreshGroup(Error::RegionError { region, message });
    }
    match response.into_split_region() {
        Ok(body) => SplitAttempt::Split(body.regions),
        Err(err) => SplitAttempt::Fatal(err),
    }
}

/// Regions produced by one or more batches, plus the first error seen.
///
/// Both can be set: a failed batch does not undo the splits that other
/// batches already made.
#[derive(Debug, Default)]
pub struct BatchSplitResult {
    /// New regions that are eligible for scattering.
    pub regions: Vec<Region>,
    /// First error observed.
    pub error: Option<Error>,
}

impl BatchSplitResult {
    fn failed(error: Error) -> Self {
        Self {
            regions: Vec::new(),
            error: Some(error),
        }
    }

    fn record_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn merge(&mut self, other: Self) {
        self.regions.extend(other.regions);
        if let Some(error) = other.error {
            self.record_error(error);
        }
    }
}

/// Result of [`KvStore::split_regions`].
#[derive(Debug, Default)]
pub struct SplitOutcome {
    /// Ids of the new regions, in batch completion order.
    pub region_ids: Vec<RegionId>,
    /// First error observed, if any batch or scatter failed.
    pub error: Option<Error>,
}

impl SplitOutcome {
    /// Converts into a `Result`, discarding partial progress on error.
    ///
    /// # Errors
    ///
    /// Returns the recorded error, if any.
    pub fn into_result(self) -> Result<Vec<RegionId>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.region_ids),
        }
    }
}

fn equal_region_start_key(key: &[u8], region_start: &[u8]) -> bool {
    key == region_start
}

impl KvStore {
    /// Splits regions at `split_keys`, optionally scattering the new
    /// regions tagged with `group`.
    ///
    /// Keys that already start a region are skipped. The returned ids leave
    /// out the last region of each split, which keeps the original region's
    /// placement.
    pub async fn split_regions(
        &self,
        cancel: &CancellationToken,
        split_keys: &[Key],
        scatter: bool,
        group: Option<&str>,
    ) -> SplitOutcome {
        if split_keys.is_empty() {
            return SplitOutcome::default();
        }

        let budget = self.config().split.backoff_ms(split_keys.len());
        let mut bo = self.backoffer(cancel, budget);
        let result = self
            .split_batch_regions(&mut bo, split_keys.to_vec(), scatter, group)
            .await;

        let region_ids: Vec<RegionId> = result.regions.iter().map(|r| r.id).collect();
        info!(
            region_count = region_ids.len(),
            region_ids = ?region_ids,
            "split regions complete"
        );
        SplitOutcome {
            region_ids,
            error: result.error,
        }
    }

    /// Groups `keys` by region and splits every group.
    pub(crate) fn split_batch_regions<'a>(
        &'a self,
        bo: &'a mut Backoffer,
        keys: Vec<Key>,
        scatter: bool,
        group: Option<&'a str>,
    ) -> BoxFuture<'a, BatchSplitResult> {
        async move {
            let groups = match self
                .locator()
                .group_keys_by_region(bo, &keys, Some(equal_region_start_key))
                .await
            {
                Ok(groups) => groups,
                Err(err) => return BatchSplitResult::failed(err),
            };

            let limit = self.config().split.batch_limit;
            let mut batches = Vec::new();
            for (region, region_keys) in groups {
                append_key_batches(&mut batches, region, region_keys, limit);
            }

            let Some(first) = batches.first() else {
                return BatchSplitResult::default();
            };
            if bo.total_sleep_ms() == 0 {
                info!(
                    split_key_count = keys.len(),
                    batch_count = batches.len(),
                    first_batch_region = %first.region,
                    first_split_key = ?first.keys.first(),
                    "split batch regions request"
                );
            }

            if batches.len() == 1 {
                let batch = batches.swap_remove(0);
                return self.send_single_batch(bo, batch, scatter, group).await;
            }

            let mut tasks: TaskGroup<BatchSplitResult> =
                TaskGroup::with_capacity("split batch", batches.len());
            for batch in batches {
                let store = self.clone();
                let mut fork = bo.fork();
                let group = group.map(str::to_owned);
                tasks.spawn(async move {
                    Ok(store
                        .send_single_batch(&mut fork, batch, scatter, group.as_deref())
                        .await)
                });
            }

            let mut merged = BatchSplitResult::default();
            for outcome in tasks.join().await {
                let result = outcome.unwrap_or_else(BatchSplitResult::failed);
                if let Some(err) = &result.error {
                    info!(error = %err, "batch split regions failed");
                }
                merged.merge(result);
            }
            merged
        }
        .boxed()
    }

    /// Splits one batch and scatters its new regions.
    async fn send_single_batch(
        &self,
        bo: &mut Backoffer,
        batch: Batch,
        scatter: bool,
        group: Option<&str>,
    ) -> BatchSplitResult {
        let request = Request::SplitRegion(SplitRegionRequest {
            split_keys: batch.keys.clone(),
        });
        let outcome = self
            .sender()
            .send(bo, request, batch.region, self.config().timeouts.split)
            .await;

        let mut regions = match classify_split_response(outcome, batch.region) {
            SplitAttempt::Split(regions) => regions,
            SplitAttempt::Fatal(err) => return BatchSplitResult::failed(err),
            SplitAttempt::RetryWithFreshGroup(err) => {
                self.locator().invalidate_region(batch.region);
                if let Err(err) = bo.backoff(BackoffKind::RegionMiss, err).await {
                    return BatchSplitResult::failed(err);
                }
                return self
                    .split_batch_regions(bo, batch.keys, scatter, group)
                    .await;
            }
        };

        // The last region keeps the original region's placement.
        regions.pop();
        info!(
            batch_region = %batch.region,
            first_at = ?batch.keys.first(),
            new_region_count = regions.len(),
            "batch split regions complete"
        );

        let mut result = BatchSplitResult {
            regions,
            error: None,
        };
        if !scatter {
            return result;
        }

        for (i, region) in result.regions.iter().enumerate() {
            let at = batch.keys.get(i);
            match self.scatter_region(bo, region.id, group).await {
                Ok(()) => {
                    info!(
                        batch_region = %batch.region,
                        at = ?at,
                        region_id = region.id.get(),
                        "batch split regions, scatter region complete"
                    );
                }
                Err(err) => {
                    info!(
                        batch_region = %batch.region,
                        at = ?at,
                        region_id = region.id.get(),
                        error = %err,
                        "batch split regions, scatter region failed"
                    );
                    let systemic = err.is_placement_timeout();
                    if result.error.is_none() {
                        result.error = Some(err);
                    }
                    if systemic {
                        break;
                    }
                }
            }
        }
        result
    }
}
