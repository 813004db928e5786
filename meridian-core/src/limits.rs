//! Limits and default retry budgets.
//!
//! Every batch and every retry loop in the client runs under one of these
//! bounds. Budgets are in milliseconds of accumulated backoff sleep.

use std::time::Duration;

/// Maximum number of split keys sent to one region in a single request.
pub const SPLIT_BATCH_REGION_LIMIT: usize = 16;

/// Capacity of the lock resolver's cache of resolved transactions.
pub const RESOLVED_CACHE_SIZE: u32 = 2048;

/// Scan-lock page size used by GC.
///
/// Half the resolver cache, so a GC sweep never evicts resolutions cached
/// on behalf of unrelated readers.
pub const GC_SCAN_LOCK_LIMIT: u32 = RESOLVED_CACHE_SIZE / 2;

/// Sub-range workers used by a cluster-wide GC sweep.
pub const GC_CONCURRENCY: usize = 8;

/// Regions handed to one range worker at a time.
pub const REGIONS_PER_TASK: usize = 128;

/// Backoff budget for one iteration of a GC lock sweep.
pub const GC_RESOLVE_LOCK_MAX_BACKOFF_MS: u64 = 100_000;

/// Backoff budget per requested split key.
pub const SPLIT_REGION_BACKOFF_MS: u64 = 20_000;

/// Ceiling of the split backoff budget regardless of key count.
pub const MAX_SPLIT_REGIONS_BACKOFF_MS: u64 = 120_000;

/// Default budget for waiting on a scatter to finish.
pub const WAIT_SCATTER_REGION_FINISH_BACKOFF_MS: u64 = 120_000;

/// Budget for region lookups and one-shot scatter probes.
pub const LOCATE_REGION_MAX_BACKOFF_MS: u64 = 20_000;

/// Accumulated key+value bytes that trigger a pre-split point.
pub const PRESPLIT_SIZE_THRESHOLD: u64 = 32 << 20;

/// Minimum mutations in a group before pre-splitting is considered.
pub const PRESPLIT_DETECT_THRESHOLD: usize = 100_000;

/// Timeout for short administrative RPCs such as region splits.
pub const READ_TIMEOUT_SHORT: Duration = Duration::from_secs(30);

/// Timeout for RPCs that scan data, such as scan-lock.
pub const READ_TIMEOUT_MEDIUM: Duration = Duration::from_secs(60);
