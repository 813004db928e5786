//! Byte-string keys and half-open key ranges.
//!
//! An empty key is special: as a range start it means "beginning of the
//! keyspace", as a range end (or region end) it means "end of the keyspace".

use std::borrow::Borrow;
use std::fmt;

use bytes::Bytes;

/// A key in the ordered keyspace.
///
/// Wraps `Bytes` so keys can be cloned cheaply across concurrent tasks.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    /// The empty key.
    pub const EMPTY: Self = Self(Bytes::new());

    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// Keys render as upper-case hex, which keeps binary keys readable in logs.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// A half-open key interval `[start, end)`.
///
/// An empty `start` is the beginning of the keyspace and an empty `end` is
/// the end of the keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Start of the range (inclusive).
    pub start: Key,
    /// End of the range (exclusive). Empty means unbounded.
    pub end: Key,
}

impl KeyRange {
    /// Creates a new key range.
    #[must_use]
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The whole keyspace.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            start: Key::EMPTY,
            end: Key::EMPTY,
        }
    }

    /// Returns true if the range contains `key`.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_bytes() && (self.end.is_empty() || key < self.end.as_bytes())
    }

    /// Returns true if the range holds no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.end.is_empty() && self.start >= self.end
    }

    /// Returns true once a forward scan positioned at `key` has left the range.
    ///
    /// An empty `key` marks the end of the keyspace.
    #[must_use]
    pub fn is_exhausted_at(&self, key: &[u8]) -> bool {
        key.is_empty() || (!self.end.is_empty() && key >= self.end.as_bytes())
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
