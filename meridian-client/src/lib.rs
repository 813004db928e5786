//! Meridian Client - cluster maintenance against a moving topology.
//!
//! This crate drives the two client-side workflows that have to cope with
//! region boundaries changing while they run:
//!
//! - **GC lock resolution**: sweep the keyspace, resolve every lock at or
//!   below a safe point, then advance the safe point ([`KvStore::gc`])
//! - **Split and scatter**: split regions at a set of keys, spread the new
//!   regions across stores and wait for the moves to finish
//!   ([`KvStore::split_regions`], [`KvStore::wait_scatter_region_finish`])
//!
//! The pre-split heuristic ([`KvStore::maybe_split_before_write`]) ties the
//! second workflow to large writes.
//!
//! # Design
//!
//! - **Stale views are normal**: region errors trigger re-location and a
//!   backoff, never a failure on their own
//! - **Bounded retries**: every retry loop runs under a [`Backoffer`]
//!   budget; exhaustion is what surfaces to callers
//! - **Isolated fan-out**: concurrent branches fork their backoffer and run
//!   in a [`TaskGroup`], so one panicking batch cannot sink the others
//!
//! [`Backoffer`]: meridian_flow::Backoffer

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod gc;
mod placement;
mod presplit;
mod range_task;
mod resolver;
mod rpc;
mod scatter;
mod split;
mod store;
mod task;

pub use config::{
    ClientConfig, ConfigError, GcConfig, PresplitConfig, ScatterConfig, SplitConfig, TimeoutConfig,
};
pub use gc::ResolveOutcome;
pub use placement::{Operator, OperatorStatus, PlacementClient, SCATTER_OPERATOR_DESC};
pub use presplit::{collect_split_keys, Mutation, MutationGroup};
pub use range_task::{RangeTaskRunner, RangeTaskStat};
pub use resolver::LockResolver;
pub use rpc::{
    Request, RequestSender, Response, ResponseBody, ScanLockRequest, ScanLockResponse,
    SplitRegionRequest, SplitRegionResponse,
};
pub use scatter::ScatterCheck;
pub use split::{
    append_key_batches, classify_split_response, Batch, BatchSplitResult, SplitAttempt,
    SplitOutcome,
};
pub use store::KvStore;
pub use task::TaskGroup;
