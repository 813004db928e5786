//! Region scatter requests and operator polling.

use meridian_core::{Error, RegionId, Result};
use meridian_flow::{BackoffKind, Backoffer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::KvStore;

/// Polls between progress logs while waiting on a scatter.
const SCATTER_LOG_EVERY: u64 = 10;

/// Result of a single in-scattering check.
///
/// `scattering` stays true when the check gave up with an error: a caller
/// that cannot tell must not assume the scatter is done.
#[derive(Debug)]
pub struct ScatterCheck {
    /// Whether a scatter operator may still be running.
    pub scattering: bool,
    /// Error that ended the check, if it gave up.
    pub error: Option<Error>,
}

impl ScatterCheck {
    /// Converts into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the check.
    pub fn into_result(self) -> Result<bool> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.scattering),
        }
    }
}

impl KvStore {
    /// Asks the placement service to scatter one region.
    ///
    /// Placement errors are retried under `bo`, except a placement timeout,
    /// which is returned at once so the caller can stop scattering.
    pub(crate) async fn scatter_region(
        &self,
        bo: &mut Backoffer,
        region_id: RegionId,
        group: Option<&str>,
    ) -> Result<()> {
        info!(region_id = region_id.get(), "start scatter region");
        loop {
            match self.placement().scatter_regions(&[region_id], group).await {
                Ok(()) => {
                    debug!(region_id = region_id.get(), "scatter region complete");
                    return Ok(());
                }
                // A timeout means the placement service is overloaded; the
                // split batch stops scattering rather than retrying here.
                Err(err) if err.is_placement_timeout() => return Err(err),
                Err(err) => bo.backoff(BackoffKind::PlacementRpc, err).await?,
            }
        }
    }

    /// Waits until no scatter operator is running on `region_id`.
    ///
    /// `backoff_ms` bounds the total wait; zero selects the configured
    /// default.
    ///
    /// # Errors
    ///
    /// Returns `Error::Placement` if the operator response carries a header
    /// error, and `Error::BackoffExhausted` if the wait timed out.
    pub async fn wait_scatter_region_finish(
        &self,
        cancel: &CancellationToken,
        region_id: RegionId,
        backoff_ms: u64,
    ) -> Result<()> {
        let budget = if backoff_ms == 0 {
            self.config().scatter.wait_backoff_ms
        } else {
            backoff_ms
        };
        info!(region_id = region_id.get(), backoff_ms = budget, "wait scatter region");

        let mut bo = self.backoffer(cancel, budget);
        let mut polls: u64 = 0;
        loop {
            let reason = match self.placement().get_operator(region_id).await {
                Ok(Some(op)) if op.is_running_scatter() => {
                    if let Some(message) = op.header_error {
                        let err = Error::Placement { message };
                        warn!(region_id = region_id.get(), error = %err, "wait scatter region error");
                        return Err(err);
                    }
                    if polls % SCATTER_LOG_EVERY == 0 {
                        info!(
                            region_id = region_id.get(),
                            desc = %op.desc,
                            status = %op.status,
                            "wait scatter region"
                        );
                    }
                    polls += 1;
                    Error::ScatterInProgress { region_id }
                }
                Ok(_) => {
                    info!(region_id = region_id.get(), "wait scatter region finished");
                    return Ok(());
                }
                Err(err) => err,
            };
            bo.backoff(BackoffKind::RegionMiss, reason).await?;
        }
    }

    /// Checks once whether `region_id` is being scattered, retrying failed
    /// polls until the check budget runs out.
    pub async fn check_region_in_scattering(&self, region_id: RegionId) -> ScatterCheck {
        let mut bo = self.backoffer(
            &CancellationToken::new(),
            self.config().scatter.check_backoff_ms,
        );
        loop {
            match self.placement().get_operator(region_id).await {
                Ok(op) => {
                    return ScatterCheck {
                        scattering: op.is_some_and(|op| op.is_running_scatter()),
                        error: None,
                    };
                }
                Err(err) => {
                    if let Err(err) = bo.backoff(BackoffKind::RegionMiss, err).await {
                        return ScatterCheck {
                            scattering: true,
                            error: Some(err),
                        };
                    }
                }
            }
        }
    }
}
