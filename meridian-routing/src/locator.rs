//! Region location contracts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{Key, KeyLocation, Region, RegionVerId, Result};
use meridian_flow::Backoffer;

/// Predicate `(key, region_start_key)` for keys to leave out of a grouping.
pub type KeyFilter = fn(&[u8], &[u8]) -> bool;

/// Keys grouped by owning region, in the order regions were first seen.
pub type RegionGroups = Vec<(RegionVerId, Vec<Key>)>;

/// The authority on region boundaries, normally the placement service.
#[async_trait]
pub trait RegionProvider: Send + Sync {
    /// Returns the region currently owning `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RegionNotFound` if no region owns the key yet, or a
    /// placement error if the lookup failed.
    async fn get_region_by_key(&self, key: &[u8]) -> Result<Region>;
}

#[async_trait]
impl<P: RegionProvider + ?Sized> RegionProvider for Arc<P> {
    async fn get_region_by_key(&self, key: &[u8]) -> Result<Region> {
        (**self).get_region_by_key(key).await
    }
}

/// Resolves keys to the regions believed to own them.
///
/// Implementations must tolerate concurrent lookups and invalidations.
#[async_trait]
pub trait RegionLocator: Send + Sync {
    /// Returns the location of the region owning `key`.
    ///
    /// # Errors
    ///
    /// Returns an error once `bo` runs out of budget or is cancelled.
    async fn locate_key(&self, bo: &mut Backoffer, key: &[u8]) -> Result<KeyLocation>;

    /// Drops a cached region so the next lookup fetches fresh boundaries.
    fn invalidate_region(&self, region: RegionVerId);

    /// Groups `keys` by owning region.
    ///
    /// Consecutive keys that fall into the previously located region reuse
    /// that location without another lookup. Keys for which
    /// `filter(key, region_start)` returns true are dropped.
    ///
    /// # Errors
    ///
    /// Returns the first lookup error.
    async fn group_keys_by_region(
        &self,
        bo: &mut Backoffer,
        keys: &[Key],
        filter: Option<KeyFilter>,
    ) -> Result<RegionGroups> {
        let mut groups: RegionGroups = Vec::new();
        let mut slots: HashMap<RegionVerId, usize> = HashMap::new();
        let mut last: Option<KeyLocation> = None;

        for key in keys {
            let loc = match last.take() {
                Some(loc) if loc.contains(key.as_bytes()) => loc,
                _ => self.locate_key(bo, key.as_bytes()).await?,
            };

            let skip = filter.is_some_and(|f| f(key.as_bytes(), loc.start_key.as_bytes()));
            if !skip {
                let slot = *slots.entry(loc.region).or_insert_with(|| {
                    groups.push((loc.region, Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(key.clone());
            }
            last = Some(loc);
        }

        Ok(groups)
    }
}
