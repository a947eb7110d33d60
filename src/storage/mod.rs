//! Storage layer abstractions for Pixseek.
//!
//! The persisted index is the source of truth: documents, their embeddings,
//! and a path index. The HNSW graph is derived from it on load.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VectorStore                             │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                         ▲                                    │
//! │                         │                                    │
//! │                  ┌──────┴──────┐                             │
//! │                  │ RedbStorage │                             │
//! │                  └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{IndexMetadata, SCHEMA_VERSION};

use std::path::Path;

use crate::config::Config;
use crate::document::Document;
use crate::error::Result;
use crate::types::{DocumentId, Embedding};

/// Storage engine trait for Pixseek.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. The engine handles internal
/// synchronization; the [`VectorStore`](crate::index::VectorStore) lock keeps
/// storage and the in-memory graph in step.
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the index metadata.
    fn metadata(&self) -> &IndexMetadata;

    /// Closes the storage engine, flushing any pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend supports reporting flush failures.
    /// The redb backend flushes on drop (infallible), so this always returns
    /// `Ok(())` for [`RedbStorage`].
    fn close(self: Box<Self>) -> Result<()>;

    /// Returns the path to the index file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Saves documents with their embeddings, replacing the documents
    /// already stored for any image path in the batch.
    ///
    /// Deletes the replaced documents, then writes every new document, every
    /// embedding and the path index, all in a single transaction: either the
    /// whole replacement becomes visible or none of it does.
    ///
    /// Returns the ids of the replaced documents; empty if no path in the
    /// batch was indexed before.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction or serialization fails.
    fn save_documents(&self, documents: &[(Document, Embedding)]) -> Result<Vec<DocumentId>>;

    /// Deletes every document whose metadata path equals `path`.
    ///
    /// Returns the ids that were deleted; empty if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    fn delete_documents_by_path(&self, path: &Path) -> Result<Vec<DocumentId>>;

    /// Lists all stored documents, ordered by id (insertion order).
    fn list_documents(&self) -> Result<Vec<Document>>;

    /// Loads every stored embedding, for rebuilding the HNSW graph.
    fn load_embeddings(&self) -> Result<Vec<(DocumentId, Embedding)>>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
///
/// # Errors
///
/// Returns an error if:
/// - The index file is corrupted
/// - The index is locked by another process
/// - Schema version doesn't match
/// - Embedding dimension doesn't match (for existing indexes)
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}
