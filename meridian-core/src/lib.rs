//! Meridian Core - Strongly-typed identifiers, keys and errors for Meridian.
//!
//! This crate provides the vocabulary shared by every Meridian client crate:
//! region identity and boundaries, MVCC lock records, the error taxonomy and
//! the explicit limits the coordination workflows run under.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `RegionId` with `Timestamp`
//! - **Explicit limits**: Every retry budget and batch has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod key;
pub mod limits;
mod lock;
mod region;
mod types;

pub use error::{Error, Result};
pub use key::{Key, KeyRange};
pub use lock::Lock;
pub use region::{KeyLocation, Region, RegionEpoch, RegionVerId};
pub use types::{RegionId, Timestamp};
