//! Property definitions and checkers for Meridian simulation tests.
//!
//! Each checker returns every violation it finds, so a failing test can
//! print the full picture instead of the first mismatch.

use std::fmt;

use meridian_client::Batch;
use meridian_core::{Key, KeyRange, Region, RegionVerId, Timestamp};

use crate::simulated_cluster::SplitRecord;

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a coordination property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// Part of the swept range was never scanned.
    CoverageGap {
        /// First unscanned key.
        from: Key,
        /// End of the gap. Empty means keyspace end.
        to: Key,
    },
    /// A batch holds a key its region did not own.
    BatchSpansRegions {
        /// The batch's region.
        region: RegionVerId,
        /// The foreign key.
        key: Key,
    },
    /// A batch exceeds the size limit.
    BatchTooLarge {
        /// The batch's region.
        region: RegionVerId,
        /// Keys in the batch.
        size: usize,
    },
    /// A returned safe point is below the requested one or a previous one.
    SafePointRegressed {
        /// Lower bound the value had to meet.
        floor: Timestamp,
        /// The value returned.
        returned: Timestamp,
    },
}

impl fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoverageGap { from, to } => write!(f, "range [{from}, {to}) never scanned"),
            Self::BatchSpansRegions { region, key } => {
                write!(f, "batch for {region} holds foreign key {key}")
            }
            Self::BatchTooLarge { region, size } => {
                write!(f, "batch for {region} holds {size} keys")
            }
            Self::SafePointRegressed { floor, returned } => {
                write!(f, "safe point {returned} below {floor}")
            }
        }
    }
}

// ============================================================================
// Checkers
// ============================================================================

/// Checks that the union of `visited` covers `target` without gaps.
#[must_use]
pub fn check_coverage(target: &KeyRange, visited: &[KeyRange]) -> Vec<PropertyViolation> {
    let mut sorted: Vec<&KeyRange> = visited.iter().filter(|r| !r.is_empty()).collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start));

    let mut violations = Vec::new();
    // `None` once coverage reaches the end of the keyspace.
    let mut cursor = Some(target.start.clone());
    for range in sorted {
        let Some(pos) = cursor.as_ref() else {
            break;
        };
        if !target.end.is_empty() && *pos >= target.end {
            break;
        }
        if range.start > *pos {
            violations.push(PropertyViolation::CoverageGap {
                from: pos.clone(),
                to: range.start.clone(),
            });
        }
        if range.end.is_empty() {
            cursor = None;
        } else if range.end > *pos {
            cursor = Some(range.end.clone());
        }
    }

    if let Some(pos) = cursor {
        if target.end.is_empty() || pos < target.end {
            violations.push(PropertyViolation::CoverageGap {
                from: pos,
                to: target.end.clone(),
            });
        }
    }
    violations
}

/// Checks batches against the regions that existed when they were built.
#[must_use]
pub fn check_batches(batches: &[Batch], regions: &[Region], limit: usize) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    for batch in batches {
        if batch.keys.len() > limit {
            violations.push(PropertyViolation::BatchTooLarge {
                region: batch.region,
                size: batch.keys.len(),
            });
        }
        let owner = regions.iter().find(|r| r.ver_id() == batch.region);
        for key in &batch.keys {
            if !owner.is_some_and(|r| r.contains(key.as_bytes())) {
                violations.push(PropertyViolation::BatchSpansRegions {
                    region: batch.region,
                    key: key.clone(),
                });
            }
        }
    }
    violations
}

/// Checks split requests served by the cluster.
#[must_use]
pub fn check_split_records(records: &[SplitRecord], limit: usize) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    for record in records {
        if record.keys.len() > limit {
            violations.push(PropertyViolation::BatchTooLarge {
                region: record.region,
                size: record.keys.len(),
            });
        }
        for key in &record.keys {
            if !record.range.contains(key.as_bytes()) {
                violations.push(PropertyViolation::BatchSpansRegions {
                    region: record.region,
                    key: key.clone(),
                });
            }
        }
    }
    violations
}

/// Tracks safe points returned by successive GC calls.
#[derive(Debug, Default)]
pub struct SafePointChecker {
    /// Highest safe point returned so far.
    highest: Option<Timestamp>,
    /// Violations found.
    violations: Vec<PropertyViolation>,
}

impl SafePointChecker {
    /// Creates a new checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one GC call.
    pub fn record(&mut self, requested: Timestamp, returned: Timestamp) {
        let floor = self.highest.map_or(requested, |h| h.max(requested));
        if returned < floor {
            self.violations
                .push(PropertyViolation::SafePointRegressed { floor, returned });
        }
        self.highest = Some(self.highest.map_or(returned, |h| h.max(returned)));
    }

    /// Returns the violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }
}
