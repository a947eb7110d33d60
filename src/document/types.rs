//! Type definitions for documents.
//!
//! A **document** is the unit the index embeds and stores: one caption plus
//! the metadata pointing back at the image it describes. An image is never a
//! document itself; it owns
//! [`CAPTIONS_PER_IMAGE`](crate::caption::CAPTIONS_PER_IMAGE) of them.
//!
//! # Type Hierarchy
//!
//! ```text
//! CaptionBatch (captions + metadata, parallel vectors)
//!     ↓ VectorStore::add
//! Document (id, text, metadata, created_at)
//!     ↓ VectorStore::search
//! ScoredDocument (document + distance)
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, Timestamp};

/// Metadata attached to every document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Absolute path of the source image.
    ///
    /// Always set by the [`DocumentBuilder`](super::DocumentBuilder). Documents
    /// added directly to the store may omit it; the searcher never returns
    /// those.
    pub path: Option<PathBuf>,
}

impl DocumentMetadata {
    /// Creates metadata pointing at `path`.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Returns true if this metadata refers to `path`.
    pub fn refers_to(&self, path: &Path) -> bool {
        self.path.as_deref() == Some(path)
    }
}

/// A stored, embedded caption.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (UUID v7).
    pub id: DocumentId,

    /// The caption text that was embedded.
    pub text: String,

    /// Where the caption came from.
    pub metadata: DocumentMetadata,

    /// When the document was added to the index.
    pub created_at: Timestamp,
}

impl Document {
    /// Returns the source image path, if recorded.
    pub fn path(&self) -> Option<&Path> {
        self.metadata.path.as_deref()
    }
}

/// Captions paired one-to-one with their metadata.
///
/// Produced by the [`DocumentBuilder`](super::DocumentBuilder) and consumed by
/// [`VectorStore::add`](crate::index::VectorStore::add). `captions[i]` is
/// described by `metadata[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptionBatch {
    /// Caption texts, in generation order.
    pub captions: Vec<String>,

    /// Metadata for each caption.
    pub metadata: Vec<DocumentMetadata>,
}

impl CaptionBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every caption for `path`.
    pub fn push_image(&mut self, path: &Path, captions: Vec<String>) {
        self.metadata
            .extend(std::iter::repeat_n(DocumentMetadata::for_path(path), captions.len()));
        self.captions.extend(captions);
    }

    /// Number of captions in the batch.
    pub fn len(&self) -> usize {
        self.captions.len()
    }

    /// Returns true if the batch holds no captions.
    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    /// Number of distinct source images in the batch.
    pub fn image_count(&self) -> usize {
        self.metadata
            .iter()
            .filter_map(|m| m.path.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// A search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredDocument {
    /// The matching document.
    pub document: Document,

    /// Cosine distance to the query (0.0 = identical direction).
    pub distance: f32,

    /// `1.0 - distance`, for display.
    pub similarity: f32,
}

impl ScoredDocument {
    pub(crate) fn new(document: Document, distance: f32) -> Self {
        Self {
            document,
            distance,
            similarity: 1.0 - distance,
        }
    }
}

/// Outcome of a successful ingest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents written to the index.
    pub documents_added: usize,

    /// Images those documents came from.
    pub files: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_image_repeats_metadata() {
        let mut batch = CaptionBatch::new();
        batch.push_image(Path::new("/a.png"), vec!["x".into(), "y".into()]);
        batch.push_image(Path::new("/b.png"), vec!["z".into()]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.metadata.len(), 3);
        assert!(batch.metadata[1].refers_to(Path::new("/a.png")));
        assert!(batch.metadata[2].refers_to(Path::new("/b.png")));
        assert_eq!(batch.image_count(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let batch = CaptionBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.image_count(), 0);
    }

    #[test]
    fn test_scored_document_similarity() {
        let doc = Document {
            id: DocumentId::new(),
            text: "a cat".into(),
            metadata: DocumentMetadata::default(),
            created_at: Timestamp::now(),
        };
        let scored = ScoredDocument::new(doc, 0.25);
        assert!((scored.similarity - 0.75).abs() < f32::EPSILON);
        assert!(scored.document.path().is_none());
    }

    #[test]
    fn test_document_bincode_roundtrip() {
        let doc = Document {
            id: DocumentId::new(),
            text: "sunset over water".into(),
            metadata: DocumentMetadata::for_path("/photos/sunset.jpg"),
            created_at: Timestamp::from_millis(1_700_000_000_000),
        };
        let bytes = bincode::serialize(&doc).unwrap();
        let restored: Document = bincode::deserialize(&bytes).unwrap();
        assert_eq!(doc, restored);
    }
}
