//! Pre-split heuristic.
//!
//! Before a large write lands on one region, split that region so the write
//! is spread over several. This is an optimization only: any failure is
//! logged and the write proceeds against the unsplit region.

use bytes::Bytes;
use meridian_core::{Key, RegionVerId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::KvStore;

/// A pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Key written.
    pub key: Key,
    /// Value written. Empty for deletes and pessimistic locks.
    pub value: Bytes,
}

impl Mutation {
    /// Creates a mutation.
    #[must_use]
    pub fn new(key: impl Into<Key>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the payload size counted toward split points.
    #[must_use]
    pub fn size(&self) -> u64 {
        let len = self.key.len() + self.value.len();
        u64::try_from(len).unwrap_or(u64::MAX)
    }
}

/// Mutations bound for one region.
#[derive(Debug, Clone)]
pub struct MutationGroup {
    /// The region the mutations were grouped into.
    pub region: RegionVerId,
    /// Mutations in key order.
    pub mutations: Vec<Mutation>,
}

/// Returns the keys at which accumulated key plus value bytes reach
/// `threshold`.
///
/// The accumulator resets after every split point.
#[must_use]
pub fn collect_split_keys(mutations: &[Mutation], threshold: u64) -> Vec<Key> {
    let mut split_keys = Vec::new();
    let mut size: u64 = 0;
    for mutation in mutations {
        size = size.saturating_add(mutation.size());
        if size >= threshold {
            size = 0;
            split_keys.push(mutation.key.clone());
        }
    }
    split_keys
}

impl KvStore {
    /// Splits and scatters `group.region` if the group's payload is large.
    ///
    /// Returns true if a split was performed.
    pub async fn maybe_split_before_write(
        &self,
        cancel: &CancellationToken,
        group: &MutationGroup,
    ) -> bool {
        let split_keys = collect_split_keys(&group.mutations, self.config().presplit.size_threshold);
        if split_keys.is_empty() {
            return false;
        }

        let outcome = self.split_regions(cancel, &split_keys, true, None).await;
        if let Some(err) = outcome.error {
            warn!(
                region = %group.region,
                key_count = group.mutations.len(),
                error = %err,
                "pre-split regions failed"
            );
            return false;
        }

        for region_id in outcome.region_ids {
            if let Err(err) = self.wait_scatter_region_finish(cancel, region_id, 0).await {
                warn!(region_id = region_id.get(), error = %err, "pre-split wait scatter region failed");
            }
        }

        self.locator().invalidate_region(group.region);
        info!(region = %group.region, split_key_count = split_keys.len(), "pre-split region");
        true
    }

    /// Pre-splits every group with at least `presplit.detect_threshold`
    /// mutations.
    ///
    /// Returns true if any group was split; the caller should regroup its
    /// mutations then, since region boundaries moved.
    pub async fn presplit_mutation_groups(
        &self,
        cancel: &CancellationToken,
        groups: &[MutationGroup],
    ) -> bool {
        let detect_threshold = self.config().presplit.detect_threshold;
        let mut split = false;
        for group in groups {
            if group.mutations.len() >= detect_threshold
                && self.maybe_split_before_write(cancel, group).await
            {
                split = true;
            }
        }
        split
    }
}
