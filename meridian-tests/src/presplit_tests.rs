//! Pre-split heuristic tests.

use meridian_client::{ClientConfig, Mutation, MutationGroup, PresplitConfig};
use meridian_core::{Key, RegionId};
use meridian_flow::Backoffer;
use meridian_routing::RegionLocator;
use tokio_util::sync::CancellationToken;

use crate::scenarios::Harness;
use crate::simulated_cluster::SimulatedCluster;

/// Each mutation weighs 2 key bytes plus 8 value bytes.
fn mutations(prefix: char, count: usize) -> Vec<Mutation> {
    (0..count)
        .map(|i| Mutation::new(format!("{prefix}{i}").as_str(), vec![0_u8; 8]))
        .collect()
}

fn harness(size_threshold: u64, detect_threshold: usize) -> Harness {
    let config = ClientConfig::for_testing().with_presplit(
        PresplitConfig::default()
            .with_size_threshold(size_threshold)
            .with_detect_threshold(detect_threshold),
    );
    Harness::new(SimulatedCluster::new(), config)
}

fn group(h: &Harness, mutations: Vec<Mutation>) -> MutationGroup {
    let region = h.cluster.region_for(mutations[0].key.clone()).unwrap();
    MutationGroup {
        region: region.ver_id(),
        mutations,
    }
}

#[tokio::test(start_paused = true)]
async fn test_presplit_small_group_is_left_alone() {
    let h = harness(1_000, 1);
    let g = group(&h, mutations('k', 7));
    let cancel = CancellationToken::new();

    assert!(!h.store.maybe_split_before_write(&cancel, &g).await);
    assert!(h.cluster.split_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_presplit_splits_scatters_and_invalidates() {
    let h = harness(30, 1);
    h.cluster.faults().scatter_running_polls = 2;
    let cancel = CancellationToken::new();
    let mut bo = Backoffer::new(cancel.clone(), 0);
    h.cache.locate_key(&mut bo, b"k0").await.unwrap();
    let g = group(&h, mutations('k', 7));

    assert!(h.store.maybe_split_before_write(&cancel, &g).await);

    let requests = h.cluster.split_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].keys, vec![Key::from("k2"), Key::from("k5")]);
    assert_eq!(h.cluster.scatter_calls().len(), 2);
    // Two scatters, each polled through two running reports and a success.
    assert_eq!(h.cluster.operator_polls(), 6);
    assert!(h.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_presplit_split_failure_reports_no_split() {
    let h = harness(30, 1);
    h.cluster
        .faults()
        .fail_split_regions
        .insert(RegionId::new(1));
    let g = group(&h, mutations('k', 7));
    let cancel = CancellationToken::new();

    assert!(!h.store.maybe_split_before_write(&cancel, &g).await);
    assert_eq!(h.cluster.regions().len(), 1);
    assert!(h.cluster.scatter_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_presplit_scatter_wait_failure_still_counts_as_split() {
    let h = harness(30, 1);
    h.cluster.faults().scatter_running_polls = usize::MAX;
    let g = group(&h, mutations('k', 7));
    let cancel = CancellationToken::new();

    assert!(h.store.maybe_split_before_write(&cancel, &g).await);
    assert_eq!(h.cluster.regions().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_presplit_groups_respect_detect_threshold() {
    let h = harness(30, 7);
    let cancel = CancellationToken::new();
    let small = group(&h, mutations('a', 6));

    assert!(
        !h.store
            .presplit_mutation_groups(&cancel, std::slice::from_ref(&small))
            .await
    );
    assert!(h.cluster.split_requests().is_empty());

    let large = group(&h, mutations('k', 7));
    assert!(h.store.presplit_mutation_groups(&cancel, &[small, large]).await);
    let requests = h.cluster.split_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].keys, vec![Key::from("k2"), Key::from("k5")]);
}
