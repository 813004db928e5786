//! Placement service contract.
//!
//! The placement service owns the GC safe point and schedules region moves.
//! The client only asks it to scatter regions and polls the resulting
//! operators.

use std::fmt;

use async_trait::async_trait;
use meridian_core::{RegionId, Result, Timestamp};

/// Operator description the placement service uses for scatter moves.
pub const SCATTER_OPERATOR_DESC: &str = "scatter-region";

/// Lifecycle state of a placement operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStatus {
    /// Finished successfully.
    Success,
    /// Gave up after its deadline.
    Timeout,
    /// Cancelled by the scheduler.
    Cancel,
    /// Replaced by a higher-priority operator.
    Replace,
    /// Still executing.
    Running,
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Timeout => "TIMEOUT",
            Self::Cancel => "CANCEL",
            Self::Replace => "REPLACE",
            Self::Running => "RUNNING",
        };
        f.write_str(name)
    }
}

/// The operator most recently scheduled for a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    /// Region the operator moves.
    pub region_id: RegionId,
    /// Operator description, e.g. [`SCATTER_OPERATOR_DESC`].
    pub desc: String,
    /// Current status.
    pub status: OperatorStatus,
    /// Error carried in the response header.
    pub header_error: Option<String>,
}

impl Operator {
    /// Creates an operator record without a header error.
    #[must_use]
    pub fn new(region_id: RegionId, desc: impl Into<String>, status: OperatorStatus) -> Self {
        Self {
            region_id,
            desc: desc.into(),
            status,
            header_error: None,
        }
    }

    /// Returns true if this is a scatter operator that is still running.
    #[must_use]
    pub fn is_running_scatter(&self) -> bool {
        self.desc == SCATTER_OPERATOR_DESC && self.status == OperatorStatus::Running
    }
}

/// Client of the placement service.
#[async_trait]
pub trait PlacementClient: Send + Sync {
    /// Advances the cluster GC safe point.
    ///
    /// Returns the safe point now recorded, which never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be reached.
    async fn update_gc_safe_point(&self, safe_point: Timestamp) -> Result<Timestamp>;

    /// Asks the service to spread `region_ids` across stores.
    ///
    /// # Errors
    ///
    /// Returns `Error::PlacementTimeout` if the service timed out, or another
    /// placement error.
    async fn scatter_regions(&self, region_ids: &[RegionId], group: Option<&str>) -> Result<()>;

    /// Returns the operator currently attached to `region_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be reached.
    async fn get_operator(&self, region_id: RegionId) -> Result<Option<Operator>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_scatter_detection() {
        let id = RegionId::new(7);

        assert!(Operator::new(id, SCATTER_OPERATOR_DESC, OperatorStatus::Running).is_running_scatter());
        assert!(!Operator::new(id, SCATTER_OPERATOR_DESC, OperatorStatus::Success).is_running_scatter());
        assert!(!Operator::new(id, "transfer-leader", OperatorStatus::Running).is_running_scatter());
    }
}
