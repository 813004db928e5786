//! Reusable setups for Meridian simulation tests.

use std::sync::Arc;

use meridian_client::{ClientConfig, KvStore};
use meridian_core::{Key, Lock, Timestamp};
use meridian_routing::{RegionCache, RegionLocator};
use tracing_subscriber::EnvFilter;

use crate::simulated_cluster::SimulatedCluster;

/// The region cache used by simulation tests.
pub type SimRegionCache = RegionCache<Arc<SimulatedCluster>>;

/// A client wired to a simulated cluster through a real region cache.
#[derive(Debug)]
pub struct Harness {
    /// The simulated cluster.
    pub cluster: Arc<SimulatedCluster>,
    /// The client's region cache.
    pub cache: Arc<SimRegionCache>,
    /// The client under test.
    pub store: KvStore,
}

impl Harness {
    /// Creates a harness over `cluster`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn new(cluster: SimulatedCluster, config: ClientConfig) -> Self {
        init_tracing();
        let cluster = Arc::new(cluster);
        let cache = Arc::new(RegionCache::new(Arc::clone(&cluster)));
        let locator: Arc<dyn RegionLocator> = cache.clone();
        let store = KvStore::new(
            locator,
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
            config,
        )
        .expect("test config must be valid");
        Self {
            cluster,
            cache,
            store,
        }
    }

    /// Creates a harness over a cluster split at `boundaries`, using the
    /// testing configuration.
    #[must_use]
    pub fn with_boundaries(boundaries: &[&str]) -> Self {
        Self::new(
            SimulatedCluster::with_boundaries(boundaries),
            ClientConfig::for_testing(),
        )
    }

    /// Writes a lock on `key` owned by a transaction started at `ts`.
    pub fn put_lock(&self, key: &str, ts: u64) {
        self.cluster
            .put_lock(Lock::new(key, key, Timestamp::new(ts)).with_ttl_ms(3_000));
    }
}

/// Installs a test log subscriber filtered by `RUST_LOG`.
pub fn init_tracing() {
    // Another test may have installed it already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds keys from string literals.
#[must_use]
pub fn keys(raw: &[&str]) -> Vec<Key> {
    raw.iter().map(|k| Key::from(*k)).collect()
}

/// Seeds for multi-seed property runs.
pub mod seeds {
    /// Seeds every randomized property test runs with.
    pub const PROPERTY: &[u64] = &[1, 7, 42, 1_337, 9_001, 65_537];
}
