//! Region map - ordered, non-overlapping regions keyed by start key.

use std::collections::BTreeMap;
use std::ops::Bound;

use meridian_core::{Key, Region, RegionVerId};

/// Maps key ranges to the regions that own them.
///
/// Entries never overlap: inserting a region evicts every entry whose range
/// intersects it, which is how a split or merge replaces the stale view.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    /// Regions by start key.
    regions: BTreeMap<Key, Region>,
}

impl RegionMap {
    /// Creates an empty region map.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // BTreeMap::new() is not const stable
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    /// Returns the cached region owning `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<&Region> {
        self.regions
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(key))
    }

    /// Inserts a region, evicting every entry that overlaps it.
    ///
    /// Returns the number of evicted entries.
    pub fn insert(&mut self, region: Region) -> usize {
        let upper = if region.end_key.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(region.end_key.as_bytes())
        };

        // Walking backwards from the new end, ends shrink monotonically, so
        // the overlapping entries are exactly a suffix of this range.
        let stale: Vec<Key> = self
            .regions
            .range::<[u8], _>((Bound::Unbounded, upper))
            .rev()
            .take_while(|(_, existing)| {
                existing.end_key.is_empty() || existing.end_key > region.start_key
            })
            .map(|(start, _)| start.clone())
            .collect();

        for start in &stale {
            self.regions.remove(start);
        }
        self.regions.insert(region.start_key.clone(), region);
        stale.len()
    }

    /// Removes the region with the given versioned id.
    ///
    /// Returns true if an entry was removed. An entry with the same id but a
    /// different epoch is left alone.
    pub fn remove(&mut self, ver_id: RegionVerId) -> bool {
        let before = self.regions.len();
        self.regions.retain(|_, region| region.ver_id() != ver_id);
        self.regions.len() != before
    }

    /// Returns the number of cached regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns true if no regions are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterates regions in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }
}
