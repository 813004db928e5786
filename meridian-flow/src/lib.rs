//! Retry flow control for Meridian clients.
//!
//! Every operation that talks to a moving topology retries under a
//! [`Backoffer`]: a sleep budget shared by all retries of one logical
//! attempt chain, tied to a cancellation token.
//!
//! # Backoff Kinds
//!
//! | Kind | Base | Cap | Jitter | Used for |
//! |------|------|-----|--------|----------|
//! | `RegionMiss` | 2ms | 500ms | none | stale region, epoch mismatch, scatter polling |
//! | `TxnLock` | 100ms | 3s | equal | locks left unresolved by a resolve attempt |
//! | `PlacementRpc` | 500ms | 3s | equal | placement service failures |
//! | `Rpc` | 100ms | 2s | equal | storage node transport failures |
//!
//! # Concurrency
//!
//! A `Backoffer` is not `Clone`. Concurrent branches call
//! [`Backoffer::fork`] to get their own bookkeeping; forks share only
//! cancellation with their parent.
//!
//! # Example
//!
//! ```rust
//! use meridian_core::{Error, RegionId};
//! use meridian_flow::{BackoffKind, Backoffer};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut bo = Backoffer::new(CancellationToken::new(), 1_000);
//! let err = Error::ScatterInProgress { region_id: RegionId::new(1) };
//! bo.backoff(BackoffKind::RegionMiss, err).await.unwrap();
//! assert_eq!(bo.total_sleep_ms(), 2);
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backoff;

pub use backoff::{BackoffConfig, BackoffFnConfig, BackoffKind, Backoffer, Jitter};
