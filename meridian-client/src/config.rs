//! Client configuration.
//!
//! Every tunable the coordination workflows read lives here and is passed
//! to [`crate::KvStore::new`]; nothing is read from process-wide state.

use std::time::Duration;

use meridian_core::limits::{
    GC_CONCURRENCY, GC_RESOLVE_LOCK_MAX_BACKOFF_MS, GC_SCAN_LOCK_LIMIT,
    LOCATE_REGION_MAX_BACKOFF_MS, MAX_SPLIT_REGIONS_BACKOFF_MS, PRESPLIT_DETECT_THRESHOLD,
    PRESPLIT_SIZE_THRESHOLD, READ_TIMEOUT_MEDIUM, READ_TIMEOUT_SHORT, REGIONS_PER_TASK,
    SPLIT_BATCH_REGION_LIMIT, SPLIT_REGION_BACKOFF_MS, WAIT_SCATTER_REGION_FINISH_BACKOFF_MS,
};
use meridian_flow::BackoffConfig;
use thiserror::Error;

/// Top-level client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Lock resolution sweep settings.
    pub gc: GcConfig,
    /// Split orchestration settings.
    pub split: SplitConfig,
    /// Scatter polling settings.
    pub scatter: ScatterConfig,
    /// Pre-split heuristic settings.
    pub presplit: PresplitConfig,
    /// RPC timeouts.
    pub timeouts: TimeoutConfig,
    /// Backoff delay parameters.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Creates a configuration with small budgets and jitter-free backoff.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            gc: GcConfig::for_testing(),
            split: SplitConfig::default(),
            scatter: ScatterConfig::for_testing(),
            presplit: PresplitConfig::default(),
            timeouts: TimeoutConfig::default(),
            backoff: BackoffConfig::for_testing(),
        }
    }

    /// Sets the GC settings.
    #[must_use]
    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Sets the split settings.
    #[must_use]
    pub fn with_split(mut self, split: SplitConfig) -> Self {
        self.split = split;
        self
    }

    /// Sets the scatter settings.
    #[must_use]
    pub fn with_scatter(mut self, scatter: ScatterConfig) -> Self {
        self.scatter = scatter;
        self
    }

    /// Sets the pre-split settings.
    #[must_use]
    pub fn with_presplit(mut self, presplit: PresplitConfig) -> Self {
        self.presplit = presplit;
        self
    }

    /// Sets the backoff delays.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gc.validate()?;
        self.split.validate()?;
        self.scatter.validate()?;
        self.presplit.validate()?;
        if self.timeouts.split.is_zero() || self.timeouts.scan_lock.is_zero() {
            return Err(ConfigError::Invalid {
                field: "timeouts",
                message: "RPC timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Lock resolution sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Locks fetched per scan-lock request.
    pub scan_lock_limit: u32,
    /// Sub-ranges swept concurrently by `gc`.
    pub concurrency: usize,
    /// Regions per sub-range handed to a sweep worker.
    pub regions_per_task: usize,
    /// Backoff budget for one sweep iteration.
    pub resolve_lock_max_backoff_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            scan_lock_limit: GC_SCAN_LOCK_LIMIT,
            concurrency: GC_CONCURRENCY,
            regions_per_task: REGIONS_PER_TASK,
            resolve_lock_max_backoff_ms: GC_RESOLVE_LOCK_MAX_BACKOFF_MS,
        }
    }
}

impl GcConfig {
    /// Creates GC settings with a tiny scan limit so paging is exercised.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            scan_lock_limit: 4,
            concurrency: 2,
            regions_per_task: 2,
            resolve_lock_max_backoff_ms: 2_000,
        }
    }

    /// Sets the scan-lock page size.
    #[must_use]
    pub const fn with_scan_lock_limit(mut self, limit: u32) -> Self {
        self.scan_lock_limit = limit;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_lock_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "gc.scan_lock_limit",
                message: "must be at least 1".to_string(),
            });
        }
        if self.concurrency == 0 || self.regions_per_task == 0 {
            return Err(ConfigError::Invalid {
                field: "gc.concurrency",
                message: "concurrency and regions_per_task must be at least 1".to_string(),
            });
        }
        // A zero budget would let a sweep iteration retry forever.
        if self.resolve_lock_max_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "gc.resolve_lock_max_backoff_ms",
                message: "must be at least 1 ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Split orchestration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    /// Maximum split keys per request.
    pub batch_limit: usize,
    /// Backoff budget granted per requested split key.
    pub per_key_backoff_ms: u64,
    /// Ceiling of the scaled backoff budget.
    pub max_backoff_ms: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            batch_limit: SPLIT_BATCH_REGION_LIMIT,
            per_key_backoff_ms: SPLIT_REGION_BACKOFF_MS,
            max_backoff_ms: MAX_SPLIT_REGIONS_BACKOFF_MS,
        }
    }
}

impl SplitConfig {
    /// Returns the backoff budget for splitting at `key_count` keys.
    #[must_use]
    pub fn backoff_ms(&self, key_count: usize) -> u64 {
        let keys = u64::try_from(key_count).unwrap_or(u64::MAX);
        keys.saturating_mul(self.per_key_backoff_ms)
            .min(self.max_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 || self.batch_limit > SPLIT_BATCH_REGION_LIMIT {
            return Err(ConfigError::Invalid {
                field: "split.batch_limit",
                message: format!("must be in 1..={SPLIT_BATCH_REGION_LIMIT}"),
            });
        }
        if self.per_key_backoff_ms == 0 || self.max_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "split.backoff_ms",
                message: "per-key and maximum budgets must be at least 1 ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Scatter polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterConfig {
    /// Budget for waiting on a scatter when the caller passes zero.
    pub wait_backoff_ms: u64,
    /// Budget for a single in-scattering check.
    pub check_backoff_ms: u64,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            wait_backoff_ms: WAIT_SCATTER_REGION_FINISH_BACKOFF_MS,
            check_backoff_ms: LOCATE_REGION_MAX_BACKOFF_MS,
        }
    }
}

impl ScatterConfig {
    /// Creates scatter settings with short budgets.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            wait_backoff_ms: 500,
            check_backoff_ms: 100,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Zero means an unbounded backoff, and the check probe cannot be
        // cancelled.
        if self.wait_backoff_ms == 0 || self.check_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "scatter.backoff_ms",
                message: "wait and check budgets must be at least 1 ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Pre-split heuristic settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresplitConfig {
    /// Accumulated key plus value bytes per split point.
    pub size_threshold: u64,
    /// Minimum mutations in a group before pre-splitting is considered.
    pub detect_threshold: usize,
}

impl Default for PresplitConfig {
    fn default() -> Self {
        Self {
            size_threshold: PRESPLIT_SIZE_THRESHOLD,
            detect_threshold: PRESPLIT_DETECT_THRESHOLD,
        }
    }
}

impl PresplitConfig {
    /// Sets the size threshold.
    #[must_use]
    pub const fn with_size_threshold(mut self, bytes: u64) -> Self {
        self.size_threshold = bytes;
        self
    }

    /// Sets the detect threshold.
    #[must_use]
    pub const fn with_detect_threshold(mut self, mutations: usize) -> Self {
        self.detect_threshold = mutations;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.size_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "presplit.size_threshold",
                message: "must be at least 1 byte".to_string(),
            });
        }
        Ok(())
    }
}

/// RPC timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Split request timeout.
    pub split: Duration,
    /// Scan-lock request timeout.
    pub scan_lock: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            split: READ_TIMEOUT_SHORT,
            scan_lock: READ_TIMEOUT_MEDIUM,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A setting is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// The offending setting.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },
}
