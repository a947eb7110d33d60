//! Index schema definitions and versioning.
//!
//! This module defines the table structure for the redb storage engine.
//! All table definitions are compile-time constants to ensure consistency.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the metadata table. When opening an
//! existing index, we check the version and fail if it doesn't match.
//!
//! # Table Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE                                               │
//! │   Key: &str                                                  │
//! │   Value: &[u8] (bincode)                                     │
//! │   Entries: "index_metadata" -> IndexMetadata                 │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DOCUMENTS_TABLE                                              │
//! │   Key: &[u8; 16] (DocumentId as UUID bytes)                 │
//! │   Value: &[u8] (bincode-serialized Document)                │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ EMBEDDINGS_TABLE                                             │
//! │   Key: &[u8; 16] (DocumentId as UUID bytes)                 │
//! │   Value: &[u8] (raw little-endian f32)                      │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DOCUMENTS_BY_PATH_TABLE (multimap)                           │
//! │   Key: &[u8] (encoded image path)                           │
//! │   Values: &[u8; 16] (every DocumentId for that image)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingDimension;
use crate::types::Timestamp;

/// Current schema version.
///
/// Increment this when making breaking changes to the schema.
/// The index will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

/// Key of the [`IndexMetadata`] record in [`METADATA_TABLE`].
pub const METADATA_KEY: &str = "index_metadata";

/// Maximum caption size in bytes (16 KB).
pub const MAX_CAPTION_SIZE: usize = 16 * 1024;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for index-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Documents table.
///
/// Key: DocumentId as 16-byte UUID
/// Value: bincode-serialized Document (without embedding)
pub const DOCUMENTS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("documents");

/// Embeddings table.
///
/// Stored separately from documents so the HNSW rebuild reads only vectors.
/// Key: DocumentId as 16-byte UUID
/// Value: raw f32 bytes (dimension * 4 bytes)
pub const EMBEDDINGS_TABLE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("embeddings");

/// Index: documents by source image path.
///
/// Makes remove-by-path a key lookup instead of a table scan.
/// Documents without a path are not indexed here.
pub const DOCUMENTS_BY_PATH_TABLE: MultimapTableDefinition<&[u8], &[u8; 16]> =
    MultimapTableDefinition::new("documents_by_path");

// ============================================================================
// Index Metadata
// ============================================================================

/// Index metadata stored in the metadata table.
///
/// This is serialized with bincode and stored under [`METADATA_KEY`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Embedding dimension configured for this index.
    ///
    /// Once set, this cannot be changed without recreating the index.
    pub embedding_dimension: EmbeddingDimension,

    /// Timestamp when the index was created.
    pub created_at: Timestamp,

    /// Last time the index was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl IndexMetadata {
    /// Creates new metadata for a fresh index.
    pub fn new(embedding_dimension: EmbeddingDimension) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_dimension,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Checks if this metadata is compatible with the current schema.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

// ============================================================================
// Key Encoding Helpers
// ============================================================================

/// Encodes an image path as a path-index key.
///
/// Uses the platform's OS string encoding, so non-UTF-8 paths round-trip.
#[inline]
pub fn encode_path_key(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

/// Decodes a path-index key back into a path.
///
/// Keys are only ever written by [`encode_path_key`] in this process's
/// platform encoding; anything else is treated as lossy UTF-8.
pub fn decode_path_key(key: &[u8]) -> PathBuf {
    match std::str::from_utf8(key) {
        Ok(s) => PathBuf::from(s),
        Err(_) => PathBuf::from(String::from_utf8_lossy(key).into_owned()),
    }
}

/// Encodes an embedding as little-endian f32 bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes little-endian f32 bytes into an embedding.
///
/// Returns `None` if the byte length is not a multiple of 4.
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
