//! Scatter operator polling tests.

use std::sync::Arc;

use meridian_client::{
    ClientConfig, KvStore, PlacementClient, ScatterConfig, SCATTER_OPERATOR_DESC,
};
use meridian_core::{Error, RegionId};
use meridian_routing::RegionCache;
use tokio_util::sync::CancellationToken;

use crate::scenarios::Harness;
use crate::simulated_cluster::SimulatedCluster;

const REGION: RegionId = RegionId::new(1);

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_returns_once_operator_finishes() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 3);
    let cancel = CancellationToken::new();

    h.store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap();

    // Three running polls, then one reporting success.
    assert_eq!(h.cluster.operator_polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_without_operator_returns_at_once() {
    let h = Harness::with_boundaries(&[]);
    let cancel = CancellationToken::new();

    h.store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap();

    assert_eq!(h.cluster.operator_polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_ignores_other_operators() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, "merge-region", 5);
    let cancel = CancellationToken::new();

    h.store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap();

    assert_eq!(h.cluster.operator_polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_fails_on_header_error() {
    let h = Harness::with_boundaries(&[]);
    {
        let mut faults = h.cluster.faults();
        faults.scatter_running_polls = 5;
        faults
            .operator_header_errors
            .insert(REGION, "store is busy".to_string());
    }
    h.cluster.scatter_regions(&[REGION], None).await.unwrap();
    let cancel = CancellationToken::new();

    let err = h
        .store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Placement { ref message } if message.contains("store is busy")),
        "{err}"
    );
    assert_eq!(h.cluster.operator_polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_times_out() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 100_000);
    let cancel = CancellationToken::new();

    let err = h
        .store
        .wait_scatter_region_finish(&cancel, REGION, 50)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::BackoffExhausted { max_sleep_ms: 50, .. }),
        "{err}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_zero_budget_uses_default() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 100_000);
    let cancel = CancellationToken::new();

    let err = h
        .store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap_err();

    let default = h.store.config().scatter.wait_backoff_ms;
    assert!(
        matches!(err, Error::BackoffExhausted { max_sleep_ms, .. } if max_sleep_ms == default),
        "{err}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_retries_failed_polls() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.faults().operator_poll_errors = 2;
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 1);
    let cancel = CancellationToken::new();

    h.store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap();

    assert_eq!(h.cluster.operator_polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_wait_stops_when_cancelled() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 100_000);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .store
        .wait_scatter_region_finish(&cancel, REGION, 0)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_scatter_check_reports_idle_region() {
    let h = Harness::with_boundaries(&[]);

    let check = h.store.check_region_in_scattering(REGION).await;

    assert!(!check.scattering);
    assert!(check.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scatter_check_reports_running_scatter() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.start_operator(REGION, SCATTER_OPERATOR_DESC, 10);

    let check = h.store.check_region_in_scattering(REGION).await;

    assert!(check.into_result().unwrap());
    assert_eq!(h.cluster.operator_polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scatter_check_gives_up_as_scattering() {
    let h = Harness::with_boundaries(&[]);
    h.cluster.faults().operator_poll_errors = usize::MAX;

    let check = h.store.check_region_in_scattering(REGION).await;

    assert!(check.scattering);
    let err = check.error.expect("exhausted check must carry its error");
    assert!(err.is_backoff_exhausted(), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_scatter_zero_check_budget_rejected() {
    let cluster = Arc::new(SimulatedCluster::new());
    let cache = Arc::new(RegionCache::new(Arc::clone(&cluster)));
    let config = ClientConfig::for_testing().with_scatter(ScatterConfig {
        check_backoff_ms: 0,
        ..ScatterConfig::for_testing()
    });

    let err = KvStore::new(cache, cluster.clone(), cluster.clone(), cluster, config).unwrap_err();

    assert!(err.to_string().contains("scatter.backoff_ms"), "{err}");
}
