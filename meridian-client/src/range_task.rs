//! Bounded fan-out over a key range.
//!
//! The runner cuts a key range into sub-ranges of a fixed number of regions
//! and hands each sub-range to a handler, keeping at most `concurrency`
//! handlers in flight.

use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use meridian_core::limits::{LOCATE_REGION_MAX_BACKOFF_MS, REGIONS_PER_TASK};
use meridian_core::{Error, KeyRange, Result};
use meridian_flow::{BackoffConfig, Backoffer};
use meridian_routing::RegionLocator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Progress of a range task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeTaskStat {
    /// Regions fully processed.
    pub completed_regions: usize,
    /// Regions whose sub-range failed.
    pub failed_regions: usize,
}

impl AddAssign for RangeTaskStat {
    fn add_assign(&mut self, other: Self) {
        self.completed_regions += other.completed_regions;
        self.failed_regions += other.failed_regions;
    }
}

/// Runs a handler over every sub-range of a key range.
#[derive(Debug, Clone)]
pub struct RangeTaskRunner {
    /// Name used in logs.
    name: String,
    /// Maximum handlers in flight.
    concurrency: usize,
    /// Regions per sub-range.
    regions_per_task: usize,
    /// Delays for region lookups.
    backoff: Arc<BackoffConfig>,
}

impl RangeTaskRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            regions_per_task: REGIONS_PER_TASK,
            backoff: Arc::new(BackoffConfig::default()),
        }
    }

    /// Sets the number of regions per sub-range.
    #[must_use]
    pub fn with_regions_per_task(mut self, regions: usize) -> Self {
        self.regions_per_task = regions.max(1);
        self
    }

    /// Sets the delays used while walking region boundaries.
    #[must_use]
    pub fn with_backoff_config(mut self, backoff: Arc<BackoffConfig>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs `handler` on every sub-range of `range`.
    ///
    /// Each handler gets a child of `cancel`; the first failure cancels the
    /// handlers still in flight and is returned.
    ///
    /// # Errors
    ///
    /// Returns the first handler error, or a lookup error while cutting the
    /// range into sub-ranges.
    pub async fn run_on_range<F, Fut>(
        &self,
        locator: &dyn RegionLocator,
        cancel: &CancellationToken,
        range: KeyRange,
        handler: F,
    ) -> Result<RangeTaskStat>
    where
        F: Fn(CancellationToken, KeyRange) -> Fut,
        Fut: Future<Output = Result<RangeTaskStat>> + Send + 'static,
    {
        if range.is_empty() {
            info!(name = %self.name, range = %range, "empty range, nothing to run");
            return Ok(RangeTaskStat::default());
        }

        let tasks = self.split_range(locator, cancel, &range).await?;
        info!(
            name = %self.name,
            range = %range,
            task_count = tasks.len(),
            concurrency = self.concurrency,
            "range task started"
        );

        let scope = cancel.child_token();
        let mut running = stream::iter(tasks)
            .map(|(sub, regions)| {
                let handle = tokio::spawn(handler(scope.clone(), sub.clone()));
                async move { (sub, regions, handle.await) }
            })
            .buffer_unordered(self.concurrency);

        let mut stat = RangeTaskStat::default();
        while let Some((sub, regions, joined)) = running.next().await {
            let outcome = joined.unwrap_or_else(|err| {
                Err(Error::TaskFailed {
                    task: "range task",
                    message: err.to_string(),
                })
            });
            match outcome {
                Ok(sub_stat) => stat += sub_stat,
                Err(err) => {
                    stat.failed_regions += regions;
                    scope.cancel();
                    warn!(
                        name = %self.name,
                        range = %sub,
                        completed_regions = stat.completed_regions,
                        failed_regions = stat.failed_regions,
                        error = %err,
                        "range task failed"
                    );
                    return Err(err);
                }
            }
        }

        info!(
            name = %self.name,
            range = %range,
            completed_regions = stat.completed_regions,
            "range task finished"
        );
        Ok(stat)
    }

    /// Cuts `range` at every `regions_per_task`-th region boundary.
    ///
    /// Returns each sub-range with the number of regions it spans.
    async fn split_range(
        &self,
        locator: &dyn RegionLocator,
        cancel: &CancellationToken,
        range: &KeyRange,
    ) -> Result<Vec<(KeyRange, usize)>> {
        let mut bo = Backoffer::with_config(
            cancel.clone(),
            LOCATE_REGION_MAX_BACKOFF_MS,
            Arc::clone(&self.backoff),
        );
        let mut tasks = Vec::new();
        let mut task_start = range.start.clone();
        let mut key = range.start.clone();
        let mut regions = 0;

        loop {
            let loc = locator.locate_key(&mut bo, key.as_bytes()).await?;
            regions += 1;
            key = loc.end_key;

            let done = range.is_exhausted_at(key.as_bytes());
            if done || regions == self.regions_per_task {
                let task_end = if done { range.end.clone() } else { key.clone() };
                tasks.push((KeyRange::new(task_start, task_end), regions));
                task_start = key.clone();
                regions = 0;
            }
            if done {
                return Ok(tasks);
            }
        }
    }
}
