//! The client handle shared by every coordination workflow.

use std::sync::Arc;

use meridian_flow::{BackoffConfig, Backoffer};
use meridian_routing::RegionLocator;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConfigError};
use crate::placement::PlacementClient;
use crate::resolver::LockResolver;
use crate::rpc::RequestSender;

/// Handle to a Meridian cluster.
///
/// Cloning is cheap: clones share the same collaborators, which is how
/// spawned split and sweep tasks get their own handle.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<Inner>,
}

struct Inner {
    locator: Arc<dyn RegionLocator>,
    sender: Arc<dyn RequestSender>,
    resolver: Arc<dyn LockResolver>,
    placement: Arc<dyn PlacementClient>,
    config: ClientConfig,
    backoff: Arc<BackoffConfig>,
}

impl KvStore {
    /// Creates a client over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(
        locator: Arc<dyn RegionLocator>,
        sender: Arc<dyn RequestSender>,
        resolver: Arc<dyn LockResolver>,
        placement: Arc<dyn PlacementClient>,
        config: ClientConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let backoff = Arc::new(config.backoff.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                locator,
                sender,
                resolver,
                placement,
                config,
                backoff,
            }),
        })
    }

    /// Returns the region locator.
    #[must_use]
    pub fn locator(&self) -> &dyn RegionLocator {
        self.inner.locator.as_ref()
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn sender(&self) -> &dyn RequestSender {
        self.inner.sender.as_ref()
    }

    pub(crate) fn resolver(&self) -> &dyn LockResolver {
        self.inner.resolver.as_ref()
    }

    pub(crate) fn placement(&self) -> &dyn PlacementClient {
        self.inner.placement.as_ref()
    }

    /// Starts a backoff chain with the configured delays.
    pub(crate) fn backoffer(&self, cancel: &CancellationToken, max_sleep_ms: u64) -> Backoffer {
        Backoffer::with_config(cancel.clone(), max_sleep_ms, Arc::clone(&self.inner.backoff))
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
