//! Region identity and boundaries.
//!
//! A region owns a contiguous key range `[start_key, end_key)`. Every split
//! or merge bumps the region's epoch, which is how a stale cached view of a
//! region is told apart from the current one.

use std::fmt;

use crate::key::{Key, KeyRange};
use crate::types::RegionId;

/// Version counters for a region's membership and boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionEpoch {
    /// Bumped on replica membership changes.
    pub conf_ver: u64,
    /// Bumped on every split and merge.
    pub version: u64,
}

impl RegionEpoch {
    /// Creates a new epoch.
    #[must_use]
    pub const fn new(conf_ver: u64, version: u64) -> Self {
        Self { conf_ver, version }
    }
}

/// A region id together with the epoch it was observed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionVerId {
    /// Region id.
    pub id: RegionId,
    /// Epoch observed with the id.
    pub epoch: RegionEpoch,
}

impl RegionVerId {
    /// Creates a new versioned region id.
    #[must_use]
    pub const fn new(id: RegionId, epoch: RegionEpoch) -> Self {
        Self { id, epoch }
    }
}

impl fmt::Display for RegionVerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{}",
            self.id, self.epoch.conf_ver, self.epoch.version
        )
    }
}

/// A region descriptor as reported by the placement service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Region id.
    pub id: RegionId,
    /// Current epoch.
    pub epoch: RegionEpoch,
    /// First key owned by the region (inclusive). Empty means keyspace start.
    pub start_key: Key,
    /// First key not owned by the region. Empty means keyspace end.
    pub end_key: Key,
}

impl Region {
    /// Creates a new region descriptor.
    #[must_use]
    pub fn new(id: RegionId, epoch: RegionEpoch, start_key: Key, end_key: Key) -> Self {
        Self {
            id,
            epoch,
            start_key,
            end_key,
        }
    }

    /// Returns the versioned id of this region.
    #[must_use]
    pub const fn ver_id(&self) -> RegionVerId {
        RegionVerId::new(self.id, self.epoch)
    }

    /// Returns true if the region owns `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        contains(&self.start_key, &self.end_key, key)
    }

    /// Returns the key range owned by the region.
    #[must_use]
    pub fn range(&self) -> KeyRange {
        KeyRange::new(self.start_key.clone(), self.end_key.clone())
    }

    /// Returns the location view of this region.
    #[must_use]
    pub fn location(&self) -> KeyLocation {
        KeyLocation {
            region: self.ver_id(),
            start_key: self.start_key.clone(),
            end_key: self.end_key.clone(),
        }
    }
}

/// The believed owner of a key: a region's identity and boundaries as of
/// the last lookup.
///
/// Locations go stale after a split or merge until they are fetched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLocation {
    /// Versioned region id.
    pub region: RegionVerId,
    /// Region start key (inclusive).
    pub start_key: Key,
    /// Region end key (exclusive). Empty means keyspace end.
    pub end_key: Key,
}

impl KeyLocation {
    /// Returns true if the located region owns `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        contains(&self.start_key, &self.end_key, key)
    }

    /// Returns the region id of this location.
    #[must_use]
    pub const fn region_id(&self) -> RegionId {
        self.region.id
    }
}

fn contains(start: &Key, end: &Key, key: &[u8]) -> bool {
    key >= start.as_bytes() && (end.is_empty() || key < end.as_bytes())
}
