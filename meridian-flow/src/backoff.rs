//! Exponential backoff with a bounded sleep budget.
//!
//! Each [`BackoffKind`] keeps its own attempt counter, so interleaving
//! different failure kinds in one chain does not inflate unrelated delays.
//! The budget is global to the chain: once the accumulated sleep reaches
//! `max_sleep_ms`, the next backoff fails with `Error::BackoffExhausted`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use meridian_core::{Error, Result};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum backoff reasons remembered per chain.
const ERROR_HISTORY_MAX: usize = 32;

/// Largest shift applied to a base delay before the cap takes over.
const ATTEMPT_SHIFT_MAX: u32 = 32;

/// How a computed exponential delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Sleep exactly the exponential delay.
    None,
    /// Sleep a uniform random duration in `[0, delay]`.
    Full,
    /// Sleep half the delay plus a uniform random duration in `[0, delay/2]`.
    Equal,
}

/// The failure class a backoff is taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackoffKind {
    /// Region miss, stale epoch, or polling the placement service.
    RegionMiss,
    /// Locks that a resolve attempt could not clear.
    TxnLock,
    /// Placement service RPC failure.
    PlacementRpc,
    /// Storage node RPC failure.
    Rpc,
}

impl BackoffKind {
    const fn index(self) -> usize {
        match self {
            Self::RegionMiss => 0,
            Self::TxnLock => 1,
            Self::PlacementRpc => 2,
            Self::Rpc => 3,
        }
    }
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegionMiss => "regionMiss",
            Self::TxnLock => "txnLock",
            Self::PlacementRpc => "placementRPC",
            Self::Rpc => "rpc",
        };
        f.write_str(name)
    }
}

/// Delay parameters for one backoff kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffFnConfig {
    /// Delay of the first attempt in milliseconds.
    pub base_ms: u64,
    /// Upper bound of a single delay in milliseconds.
    pub cap_ms: u64,
    /// Randomization applied to each delay.
    pub jitter: Jitter,
}

impl BackoffFnConfig {
    /// Creates a new delay configuration.
    #[must_use]
    pub const fn new(base_ms: u64, cap_ms: u64, jitter: Jitter) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter,
        }
    }

    /// Returns the sleep for the given zero-based attempt.
    pub fn sleep_ms<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        let shift = attempt.min(ATTEMPT_SHIFT_MAX);
        let expo = self
            .base_ms
            .saturating_mul(1_u64 << shift)
            .min(self.cap_ms);
        match self.jitter {
            Jitter::None => expo,
            Jitter::Full => rng.gen_range(0..=expo),
            Jitter::Equal => {
                let half = expo / 2;
                half + rng.gen_range(0..=half)
            }
        }
    }
}

/// Delay parameters for every backoff kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Region miss delays.
    pub region_miss: BackoffFnConfig,
    /// Unresolved lock delays.
    pub txn_lock: BackoffFnConfig,
    /// Placement service delays.
    pub placement_rpc: BackoffFnConfig,
    /// Storage RPC delays.
    pub rpc: BackoffFnConfig,
}

impl BackoffConfig {
    /// Returns the delay parameters for `kind`.
    #[must_use]
    pub const fn for_kind(&self, kind: BackoffKind) -> BackoffFnConfig {
        match kind {
            BackoffKind::RegionMiss => self.region_miss,
            BackoffKind::TxnLock => self.txn_lock,
            BackoffKind::PlacementRpc => self.placement_rpc,
            BackoffKind::Rpc => self.rpc,
        }
    }

    /// Creates a configuration with small, jitter-free delays for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            region_miss: BackoffFnConfig::new(1, 8, Jitter::None),
            txn_lock: BackoffFnConfig::new(1, 8, Jitter::None),
            placement_rpc: BackoffFnConfig::new(1, 8, Jitter::None),
            rpc: BackoffFnConfig::new(1, 8, Jitter::None),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            region_miss: BackoffFnConfig::new(2, 500, Jitter::None),
            txn_lock: BackoffFnConfig::new(100, 3_000, Jitter::Equal),
            placement_rpc: BackoffFnConfig::new(500, 3_000, Jitter::Equal),
            rpc: BackoffFnConfig::new(100, 2_000, Jitter::Equal),
        }
    }
}

/// Retry budget and history for one logical attempt chain.
///
/// `max_sleep_ms == 0` disables the budget; only cancellation stops the
/// chain then.
#[derive(Debug)]
pub struct Backoffer {
    /// Cancellation shared with forks.
    cancel: CancellationToken,
    /// Sleep budget in milliseconds.
    max_sleep_ms: u64,
    /// Time slept so far in milliseconds.
    total_sleep_ms: u64,
    /// Attempts per kind, indexed by `BackoffKind::index`.
    attempts: [u32; 4],
    /// Recent backoff reasons, oldest first.
    errors: Vec<String>,
    /// Delay parameters.
    config: Arc<BackoffConfig>,
}

impl Backoffer {
    /// Creates a backoffer with default delays.
    #[must_use]
    pub fn new(cancel: CancellationToken, max_sleep_ms: u64) -> Self {
        Self::with_config(cancel, max_sleep_ms, Arc::new(BackoffConfig::default()))
    }

    /// Creates a backoffer with the given delays.
    #[must_use]
    pub const fn with_config(
        cancel: CancellationToken,
        max_sleep_ms: u64,
        config: Arc<BackoffConfig>,
    ) -> Self {
        Self {
            cancel,
            max_sleep_ms,
            total_sleep_ms: 0,
            attempts: [0; 4],
            errors: Vec::new(),
            config,
        }
    }

    /// Forks an independent backoffer for a concurrent branch.
    ///
    /// The fork observes this backoffer's cancellation (and can be cancelled
    /// on its own without affecting the parent), keeps the same budget and
    /// delays, and starts with empty sleep bookkeeping.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::with_config(
            self.cancel.child_token(),
            self.max_sleep_ms,
            Arc::clone(&self.config),
        )
    }

    /// Sleeps before the next retry of a failure of class `kind`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the chain is cancelled before or while
    /// sleeping, and `Error::BackoffExhausted` (wrapping `err`) once the
    /// sleep budget has been used up.
    pub async fn backoff(&mut self, kind: BackoffKind, err: Error) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: "backoff",
            });
        }

        if self.errors.len() == ERROR_HISTORY_MAX {
            self.errors.remove(0);
        }
        self.errors.push(format!("{kind}: {err}"));

        if self.max_sleep_ms > 0 && self.total_sleep_ms >= self.max_sleep_ms {
            warn!(
                kind = %kind,
                max_sleep_ms = self.max_sleep_ms,
                total_sleep_ms = self.total_sleep_ms,
                error = %err,
                "backoff budget exhausted"
            );
            return Err(Error::BackoffExhausted {
                max_sleep_ms: self.max_sleep_ms,
                total_sleep_ms: self.total_sleep_ms,
                source: Box::new(err),
            });
        }

        let attempt = &mut self.attempts[kind.index()];
        let sleep_ms = self
            .config
            .for_kind(kind)
            .sleep_ms(*attempt, &mut rand::thread_rng());
        *attempt = attempt.saturating_add(1);

        debug!(
            kind = %kind,
            sleep_ms,
            total_sleep_ms = self.total_sleep_ms,
            error = %err,
            "backing off"
        );

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            () = self.cancel.cancelled() => {
                return Err(Error::Cancelled { operation: "backoff" });
            }
        }

        self.total_sleep_ms = self.total_sleep_ms.saturating_add(sleep_ms);
        Ok(())
    }

    /// Returns the time slept so far in milliseconds.
    #[must_use]
    pub const fn total_sleep_ms(&self) -> u64 {
        self.total_sleep_ms
    }

    /// Returns the sleep budget in milliseconds.
    #[must_use]
    pub const fn max_sleep_ms(&self) -> u64 {
        self.max_sleep_ms
    }

    /// Returns the cancellation token of this chain.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true once the chain has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the recent backoff reasons, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
