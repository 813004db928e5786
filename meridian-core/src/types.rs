//! Strongly-typed identifiers for Meridian entities.
//!
//! Explicit types prevent bugs from mixing up IDs. All IDs are 64-bit,
//! matching the placement service's wire representation.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `RegionId` with `Timestamp`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Placement.
define_id!(RegionId, "region", "Unique identifier for a region (a contiguous key range shard).");

// MVCC.
define_id!(
    Timestamp,
    "ts",
    "A hybrid logical timestamp: transaction start versions and GC safe points."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let region = RegionId::new(42);
        assert_eq!(format!("{region}"), "region-42");
        assert_eq!(format!("{region:?}"), "region(42)");
    }

    #[test]
    fn test_id_ordering() {
        let a = Timestamp::new(50);
        let b = Timestamp::new(100);

        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn test_id_conversions() {
        let region = RegionId::from(7);
        assert_eq!(u64::from(region), 7);
    }
}
