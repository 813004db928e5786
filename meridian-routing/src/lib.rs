//! Meridian Routing - region location for range-partitioned keys.
//!
//! Every request the client sends is addressed to a region, the owner of a
//! contiguous key range. This crate answers "which region owns this key"
//! from a local cache, refreshing from the placement service on a miss and
//! dropping entries that a storage node reported as stale.
//!
//! # Design
//!
//! - **Ordered map**: regions are kept by start key, so a lookup is one
//!   `BTreeMap` range probe
//! - **Invalidate, don't lock**: topology changes are handled by dropping
//!   stale entries and re-fetching, never by holding a lock across an RPC
//! - **Trait seam**: callers depend on [`RegionLocator`], so tests can swap
//!   in a simulated topology

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod locator;
mod region_cache;
mod region_map;

pub use locator::{KeyFilter, RegionGroups, RegionLocator, RegionProvider};
pub use region_cache::RegionCache;
pub use region_map::RegionMap;
