//! Meridian Tests - Simulation testing for the Meridian client.
//!
//! Every test drives a real `KvStore` and `RegionCache` against
//! [`simulated_cluster::SimulatedCluster`], which plays the placement
//! service, the storage nodes and the lock resolver. Tests run on a paused
//! tokio clock so backoff sleeps cost no wall time.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `gc_tests`: lock resolution sweep and safe point advancement
//! - `split_tests`: batched region splits and scatter follow-up
//! - `scatter_tests`: scatter operator polling
//! - `presplit_tests`: pre-split heuristic for large writes
//!
//! **Support Modules**:
//! - `simulated_cluster`: in-memory cluster with fault injection
//! - `properties`: property definitions (coverage, batch integrity, safe
//!   point monotonicity)
//! - `scenarios`: reusable test setups
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulated_cluster;

// Integration test modules.
#[cfg(test)]
mod gc_tests;
#[cfg(test)]
mod presplit_tests;
#[cfg(test)]
mod scatter_tests;
