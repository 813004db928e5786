//! Region cache - the client's view of region boundaries.
//!
//! Lookups are served from a [`RegionMap`]; a miss asks the
//! [`RegionProvider`] and caches the answer. Entries leave the cache only
//! when a caller reports them stale or a newer overlapping region replaces
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use meridian_core::{Error, KeyLocation, Region, RegionVerId, Result};
use meridian_flow::{BackoffKind, Backoffer};
use tracing::debug;

use crate::locator::{RegionLocator, RegionProvider};
use crate::region_map::RegionMap;

/// A region cache backed by a provider.
#[derive(Debug)]
pub struct RegionCache<P> {
    /// Source of truth for cache misses.
    provider: P,
    /// Cached regions.
    regions: RwLock<RegionMap>,
    /// Lookups served from the cache.
    hits: AtomicU64,
    /// Lookups that went to the provider.
    misses: AtomicU64,
}

impl<P: RegionProvider> RegionCache<P> {
    /// Creates an empty cache over `provider`.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            regions: RwLock::new(RegionMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the number of lookups served from the cache.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups that went to the provider.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of cached regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no regions are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: &[u8]) -> Option<KeyLocation> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(key)
            .map(Region::location)
    }

    async fn load(&self, bo: &mut Backoffer, key: &[u8]) -> Result<KeyLocation> {
        loop {
            match self.provider.get_region_by_key(key).await {
                Ok(region) => {
                    let loc = region.location();
                    let evicted = self
                        .regions
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(region);
                    debug!(region = %loc.region, evicted, "cached region");
                    return Ok(loc);
                }
                Err(err @ Error::RegionNotFound { .. }) => {
                    bo.backoff(BackoffKind::RegionMiss, err).await?;
                }
                Err(err) if err.is_retryable() => {
                    bo.backoff(BackoffKind::PlacementRpc, err).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<P: RegionProvider> RegionLocator for RegionCache<P> {
    async fn locate_key(&self, bo: &mut Backoffer, key: &[u8]) -> Result<KeyLocation> {
        if let Some(loc) = self.cached(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(loc);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.load(bo, key).await
    }

    fn invalidate_region(&self, region: RegionVerId) {
        let removed = self
            .regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(region);
        if removed {
            debug!(region = %region, "invalidated cached region");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use meridian_core::{Key, RegionEpoch, RegionId};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::locator::KeyFilter;

    /// Provider over a fixed region list that can fail the first N lookups.
    struct StaticProvider {
        regions: Mutex<Vec<Region>>,
        fail_first: AtomicUsize,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(regions: Vec<Region>) -> Self {
            Self {
                regions: Mutex::new(regions),
                fail_first: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RegionProvider for StaticProvider {
        async fn get_region_by_key(&self, key: &[u8]) -> Result<Region> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Placement {
                    message: "leader changing".into(),
                });
            }
            self.regions
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.contains(key))
                .cloned()
                .ok_or_else(|| Error::RegionNotFound {
                    key: Key::from(key),
                })
        }
    }

    fn region(id: u64, version: u64, start: &str, end: &str) -> Region {
        Region::new(
            RegionId::new(id),
            RegionEpoch::new(1, version),
            Key::from(start),
            Key::from(end),
        )
    }

    fn three_regions() -> Vec<Region> {
        vec![
            region(1, 1, "", "g"),
            region(2, 1, "g", "p"),
            region(3, 1, "p", ""),
        ]
    }

    fn at_region_start(key: &[u8], start: &[u8]) -> bool {
        key == start
    }

    fn bo() -> Backoffer {
        Backoffer::new(CancellationToken::new(), 1_000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lookup_hits_cache() {
        let cache = RegionCache::new(StaticProvider::new(three_regions()));
        let mut bo = bo();

        let first = cache.locate_key(&mut bo, b"h").await.unwrap();
        let second = cache.locate_key(&mut bo, b"k").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.region_id(), RegionId::new(2));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_errors_are_retried() {
        let provider = StaticProvider::new(three_regions());
        provider.fail_first.store(2, Ordering::SeqCst);
        let cache = RegionCache::new(provider);
        let mut bo = bo();

        let loc = cache.locate_key(&mut bo, b"a").await.unwrap();

        assert_eq!(loc.region_id(), RegionId::new(1));
        assert_eq!(cache.provider().calls.load(Ordering::SeqCst), 3);
        assert!(bo.total_sleep_ms() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refresh() {
        let cache = RegionCache::new(StaticProvider::new(three_regions()));
        let mut bo = bo();

        let loc = cache.locate_key(&mut bo, b"h").await.unwrap();
        *cache.provider().regions.lock().unwrap() = vec![
            region(1, 1, "", "g"),
            region(2, 2, "g", "k"),
            region(4, 2, "k", "p"),
            region(3, 1, "p", ""),
        ];
        cache.invalidate_region(loc.region);

        let fresh = cache.locate_key(&mut bo, b"m").await.unwrap();
        assert_eq!(fresh.region_id(), RegionId::new(4));
        assert_eq!(cache.misses(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_keys_first_seen_order() {
        let cache = RegionCache::new(StaticProvider::new(three_regions()));
        let mut bo = bo();
        let keys: Vec<Key> = ["q", "a", "b", "r", "h"].into_iter().map(Key::from).collect();

        let groups = cache.group_keys_by_region(&mut bo, &keys, None).await.unwrap();

        let shape: Vec<(u64, Vec<Key>)> = groups
            .into_iter()
            .map(|(ver, keys)| (ver.id.get(), keys))
            .collect();
        assert_eq!(
            shape,
            vec![
                (3, vec![Key::from("q"), Key::from("r")]),
                (1, vec![Key::from("a"), Key::from("b")]),
                (2, vec![Key::from("h")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_keys_applies_filter() {
        let cache = RegionCache::new(StaticProvider::new(three_regions()));
        let mut bo = bo();
        let keys: Vec<Key> = ["g", "h", "p"].into_iter().map(Key::from).collect();

        let groups = cache
            .group_keys_by_region(&mut bo, &keys, Some(at_region_start as KeyFilter))
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.id, RegionId::new(2));
        assert_eq!(groups[0].1, vec![Key::from("h")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_region_exhausts_budget() {
        let cache = RegionCache::new(StaticProvider::new(vec![region(1, 1, "a", "c")]));
        let mut bo = Backoffer::new(CancellationToken::new(), 20);

        let err = cache.locate_key(&mut bo, b"x").await.unwrap_err();
        assert!(err.is_backoff_exhausted());
    }
}
