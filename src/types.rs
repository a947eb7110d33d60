//! Core type definitions for Pixseek identifiers and timestamps.
//!
//! Document identifiers use UUID v7 for time-ordered unique identification,
//! so sorting by id reproduces insertion order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Document identifier (UUID v7 for time-ordering).
///
/// One document is one embedded caption. An image owns exactly
/// [`CAPTIONS_PER_IMAGE`](crate::caption::CAPTIONS_PER_IMAGE) documents.
///
/// # Example
/// ```
/// use pixseek::DocumentId;
///
/// let id = DocumentId::new();
/// println!("Created document: {}", id);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Creates a new DocumentId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) DocumentId.
    /// Useful for testing or sentinel values.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the raw UUID bytes for storage.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates a DocumentId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for DocumentId {
    /// Returns a nil (all zeros) DocumentId.
    ///
    /// For a new unique ID, use [`DocumentId::new()`].
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch, returns a timestamp
    /// of 0 (epoch) rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Embedding vector type.
pub type Embedding = Vec<f32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_roundtrip_bytes() {
        let id = DocumentId::new();
        let restored = DocumentId::from_bytes(*id.as_bytes());
        assert_eq!(id, restored);
    }

    #[test]
    fn test_document_ids_are_time_ordered() {
        let first = DocumentId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = DocumentId::new();
        assert!(first < second);
    }

    #[test]
    fn test_document_id_default_is_nil() {
        assert_eq!(DocumentId::default(), DocumentId::nil());
    }

    #[test]
    fn test_timestamp_now_is_positive() {
        assert!(Timestamp::now().as_millis() > 0);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::from_millis(1000) < Timestamp::from_millis(2000));
    }
}
