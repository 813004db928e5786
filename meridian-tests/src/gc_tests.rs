//! Lock resolution sweep and GC tests.

use meridian_client::{ClientConfig, GcConfig};
use meridian_core::{Error, Key, KeyRange, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::properties::{check_coverage, SafePointChecker};
use crate::scenarios::Harness;
use crate::simulated_cluster::{SimulatedCluster, TopologyChange};

fn lock_keys(locks: &[meridian_core::Lock]) -> Vec<Key> {
    let mut keys: Vec<Key> = locks.iter().map(|l| l.key.clone()).collect();
    keys.sort();
    keys
}

#[tokio::test(start_paused = true)]
async fn test_gc_resolves_locks_at_or_below_safe_point() {
    let h = Harness::with_boundaries(&["m"]);
    h.put_lock("a", 50);
    h.put_lock("b", 60);
    h.put_lock("c", 150);
    h.put_lock("x", 100);

    let cancel = CancellationToken::new();
    let safe_point = h.store.gc(&cancel, Timestamp::new(100)).await.unwrap();

    assert_eq!(safe_point, Timestamp::new(100));
    assert_eq!(h.cluster.safe_point(), Timestamp::new(100));
    assert_eq!(lock_keys(&h.cluster.remaining_locks()), vec![Key::from("c")]);
    assert_eq!(
        lock_keys(&h.cluster.resolved_locks()),
        vec![Key::from("a"), Key::from("b"), Key::from("x")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gc_second_run_is_a_no_op() {
    let h = Harness::with_boundaries(&["g", "p"]);
    for key in ["a", "h", "q"] {
        h.put_lock(key, 10);
    }
    let cancel = CancellationToken::new();

    h.store.gc(&cancel, Timestamp::new(20)).await.unwrap();
    let resolved = h.cluster.resolved_locks().len();
    h.store.gc(&cancel, Timestamp::new(20)).await.unwrap();

    assert_eq!(resolved, 3);
    assert_eq!(h.cluster.resolved_locks().len(), resolved);
    assert!(h.cluster.remaining_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_safe_point_never_regresses() {
    let h = Harness::with_boundaries(&["m"]);
    let cancel = CancellationToken::new();
    let mut checker = SafePointChecker::new();

    for requested in [100, 50, 120, 120, 90] {
        let requested = Timestamp::new(requested);
        let returned = h.store.gc(&cancel, requested).await.unwrap();
        checker.record(requested, returned);
    }

    assert!(checker.violations().is_empty(), "{:?}", checker.violations());
    assert_eq!(h.cluster.safe_point(), Timestamp::new(120));
}

#[tokio::test(start_paused = true)]
async fn test_gc_range_sweep_covers_keyspace_across_split_and_merge() {
    let h = Harness::with_boundaries(&["d", "m", "t"]);
    for key in ["a", "c", "e", "g", "k", "n", "q", "u", "z"] {
        h.put_lock(key, 5);
    }
    {
        let mut faults = h.cluster.faults();
        faults.topology_changes.push((
            1,
            TopologyChange::Split {
                at: Key::from("f"),
            },
        ));
        faults.topology_changes.push((
            2,
            TopologyChange::Merge {
                key: Key::from("m"),
            },
        ));
    }

    let cancel = CancellationToken::new();
    let stat = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(10), Key::EMPTY, Key::EMPTY)
        .await
        .unwrap();

    assert!(stat.completed_regions >= 3);
    assert!(h.cluster.remaining_locks().is_empty());
    let gaps = check_coverage(&KeyRange::full(), &h.cluster.scanned_ranges());
    assert!(gaps.is_empty(), "{gaps:?}");
}

#[tokio::test(start_paused = true)]
async fn test_gc_concurrent_sweep_covers_keyspace_across_topology_changes() {
    let h = Harness::with_boundaries(&["c", "f", "j", "n", "r", "v"]);
    for key in ["a", "b", "d", "g", "h", "k", "o", "s", "w", "y"] {
        h.put_lock(key, 5);
    }
    {
        let mut faults = h.cluster.faults();
        faults.topology_changes.push((
            2,
            TopologyChange::Split {
                at: Key::from("x"),
            },
        ));
        faults.topology_changes.push((
            3,
            TopologyChange::Merge {
                key: Key::from("j"),
            },
        ));
    }

    let cancel = CancellationToken::new();
    h.store.gc(&cancel, Timestamp::new(10)).await.unwrap();

    assert!(h.cluster.remaining_locks().is_empty());
    let gaps = check_coverage(&KeyRange::full(), &h.cluster.scanned_ranges());
    assert!(gaps.is_empty(), "{gaps:?}");
    assert_eq!(h.cluster.safe_point(), Timestamp::new(10));
}

#[tokio::test(start_paused = true)]
async fn test_gc_pages_through_full_region() {
    // The testing config scans 4 locks per request.
    let h = Harness::with_boundaries(&[]);
    for i in 0..10 {
        h.put_lock(&format!("k{i:02}"), 1);
    }

    let cancel = CancellationToken::new();
    let stat = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(1), Key::EMPTY, Key::EMPTY)
        .await
        .unwrap();

    assert_eq!(h.cluster.scanned_ranges().len(), 3);
    assert_eq!(stat.completed_regions, 1);
    assert!(h.cluster.remaining_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_range_stops_at_end_key() {
    let h = Harness::with_boundaries(&["d", "m"]);
    for key in ["a", "e", "p"] {
        h.put_lock(key, 1);
    }

    let cancel = CancellationToken::new();
    let stat = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(1), Key::EMPTY, Key::from("m"))
        .await
        .unwrap();

    assert_eq!(stat.completed_regions, 2);
    assert_eq!(lock_keys(&h.cluster.remaining_locks()), vec![Key::from("p")]);
}

#[tokio::test(start_paused = true)]
async fn test_gc_retries_region_errors() {
    let h = Harness::with_boundaries(&["m"]);
    h.put_lock("a", 1);
    h.put_lock("z", 1);
    h.cluster
        .faults()
        .region_errors
        .insert(meridian_core::RegionId::new(1), 3);

    let cancel = CancellationToken::new();
    h.store.gc(&cancel, Timestamp::new(5)).await.unwrap();

    assert_eq!(h.cluster.region_errors_served(), 3);
    assert!(h.cluster.remaining_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_retries_transport_errors() {
    let h = Harness::with_boundaries(&[]);
    h.put_lock("a", 1);
    h.cluster.faults().rpc_errors = 2;

    let cancel = CancellationToken::new();
    h.store.gc(&cancel, Timestamp::new(5)).await.unwrap();

    assert!(h.cluster.remaining_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_missing_body_is_fatal() {
    let h = Harness::with_boundaries(&[]);
    h.put_lock("a", 1);
    h.cluster.faults().missing_bodies = 1;

    let cancel = CancellationToken::new();
    let err = h.store.gc(&cancel, Timestamp::new(5)).await.unwrap_err();

    assert!(matches!(err, Error::BodyMissing { .. }), "{err}");
    assert_eq!(h.cluster.safe_point(), Timestamp::new(0));
    assert_eq!(h.cluster.remaining_locks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gc_cancelled_sweep_leaves_safe_point() {
    let h = Harness::with_boundaries(&["m"]);
    h.put_lock("a", 1);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.store.gc(&cancel, Timestamp::new(5)).await.unwrap_err();

    assert!(err.is_cancelled(), "{err}");
    assert_eq!(h.cluster.safe_point(), Timestamp::new(0));
    assert_eq!(h.cluster.remaining_locks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gc_partial_resolve_retries_in_same_region() {
    let h = Harness::with_boundaries(&[]);
    h.put_lock("a", 1);
    h.put_lock("b", 1);
    h.cluster.faults().partial_resolves = 2;

    let cancel = CancellationToken::new();
    let stat = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(5), Key::EMPTY, Key::EMPTY)
        .await
        .unwrap();

    assert_eq!(stat.completed_regions, 1);
    assert_eq!(h.cluster.scanned_ranges().len(), 1);
    assert!(h.cluster.remaining_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_rescans_when_locks_span_regions() {
    let h = Harness::with_boundaries(&[]);
    for key in ["a", "b", "m", "n"] {
        h.put_lock(key, 1);
    }
    // The region splits between the scan and the resolve.
    h.cluster.faults().topology_changes.push((
        1,
        TopologyChange::Split {
            at: Key::from("h"),
        },
    ));

    let cancel = CancellationToken::new();
    let stat = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(5), Key::EMPTY, Key::EMPTY)
        .await
        .unwrap();

    assert!(h.cluster.remaining_locks().is_empty());
    assert_eq!(stat.completed_regions, 2);
    let scans = h.cluster.scanned_ranges();
    assert_eq!(scans.len(), 3);
    assert_eq!(scans[1], KeyRange::new("", "h"));
    assert_eq!(scans[2], KeyRange::new("h", ""));
}

#[tokio::test(start_paused = true)]
async fn test_gc_resolve_budget_exhausted_by_partial_resolves() {
    let config = ClientConfig::for_testing().with_gc(GcConfig {
        resolve_lock_max_backoff_ms: 20,
        ..GcConfig::for_testing()
    });
    let h = Harness::new(SimulatedCluster::new(), config);
    h.put_lock("a", 1);
    h.cluster.faults().partial_resolves = usize::MAX;

    let cancel = CancellationToken::new();
    let err = h
        .store
        .resolve_locks_for_range(&cancel, Timestamp::new(5), Key::EMPTY, Key::EMPTY)
        .await
        .unwrap_err();

    assert!(err.is_backoff_exhausted(), "{err}");
    assert!(matches!(
        err,
        Error::BackoffExhausted { ref source, .. } if matches!(**source, Error::LocksNotResolved { remaining: 1 })
    ));
}
