//! redb storage engine implementation.
//!
//! This module provides the persistence backend for Pixseek using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//! - Exclusive file lock, so one process owns an index at a time
//!
//! # Durability
//!
//! [`SyncMode::Normal`] commits with `Durability::Immediate`: a returned
//! `add`/`remove` is on disk. [`SyncMode::Fast`] commits with
//! `Durability::Eventual`: a crash may roll back to an earlier commit, but
//! never to a partially applied one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ::redb::{Database, Durability, ReadableTable, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    decode_embedding, encode_embedding, encode_path_key, IndexMetadata, DOCUMENTS_BY_PATH_TABLE,
    DOCUMENTS_TABLE, EMBEDDINGS_TABLE, METADATA_KEY, METADATA_TABLE, SCHEMA_VERSION,
};
use super::StorageEngine;
use crate::config::{Config, EmbeddingDimension, SyncMode};
use crate::document::Document;
use crate::error::{PixseekError, Result, StorageError, ValidationError};
use crate::types::{DocumentId, Embedding};

/// redb storage engine wrapper.
///
/// This struct holds the redb database handle and cached metadata.
/// It implements [`StorageEngine`] for use by the vector store.
///
/// # Thread Safety
///
/// `RedbStorage` is `Send + Sync`. redb handles internal synchronization
/// using MVCC for readers and exclusive locking for writers.
#[derive(Debug)]
pub struct RedbStorage {
    /// The redb database handle.
    db: Database,

    /// Cached index metadata.
    metadata: IndexMetadata,

    /// Path to the index file.
    path: PathBuf,

    /// Commit durability for document writes.
    sync_mode: SyncMode,
}

impl RedbStorage {
    /// Opens or creates an index at the given path.
    ///
    /// If the file doesn't exist, it will be created and initialized with the
    /// configuration settings. If it exists, the configuration is validated
    /// against the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The index file is corrupted
    /// - The index is locked by another process
    /// - Schema version doesn't match
    /// - Embedding dimension doesn't match (for existing indexes)
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.exists();

        debug!(exists = exists, "Opening storage engine");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self::create_database(path)?;

        if exists {
            Self::open_existing(db, path.to_path_buf(), config)
        } else {
            Self::initialize_new(db, path.to_path_buf(), config)
        }
    }

    /// Creates the redb database handle.
    fn create_database(path: &Path) -> Result<Database> {
        let db = Database::builder().create(path).map_err(|e| match e {
            ::redb::DatabaseError::DatabaseAlreadyOpen => StorageError::DatabaseLocked,
            other => StorageError::Redb(other.to_string()),
        })?;

        debug!("Index file opened successfully");
        Ok(db)
    }

    /// Initializes a new index with tables and metadata.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Initializing new index");

        let metadata = IndexMetadata::new(config.embedding_dimension);

        // Create all tables and write metadata in a single transaction
        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            write_metadata(&write_txn, &metadata)?;

            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let _ = write_txn.open_multimap_table(DOCUMENTS_BY_PATH_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = SCHEMA_VERSION,
            dimension = config.dimension(),
            "Index initialized"
        );

        Ok(Self {
            db,
            metadata,
            path,
            sync_mode: config.sync_mode,
        })
    }

    /// Opens and validates an existing index.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Opening existing index");

        let read_txn = db.begin_read().map_err(StorageError::from)?;
        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing index metadata"))?;

            bincode::deserialize::<IndexMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };
        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Schema version mismatch"
            );
            return Err(PixseekError::Storage(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }));
        }

        // Compare sizes: D384 and Custom(384) describe the same vectors
        if metadata.embedding_dimension.size() != config.dimension() {
            warn!(
                expected = config.dimension(),
                found = metadata.embedding_dimension.size(),
                "Embedding dimension mismatch"
            );
            return Err(PixseekError::Validation(ValidationError::DimensionMismatch {
                expected: config.dimension(),
                got: metadata.embedding_dimension.size(),
            }));
        }

        let mut metadata = metadata;
        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = metadata.schema_version,
            dimension = metadata.embedding_dimension.size(),
            "Index opened successfully"
        );

        Ok(Self {
            db,
            metadata,
            path,
            sync_mode: config.sync_mode,
        })
    }

    /// Returns a reference to the underlying redb database.
    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the embedding dimension configured for this index.
    #[inline]
    pub fn embedding_dimension(&self) -> EmbeddingDimension {
        self.metadata.embedding_dimension
    }

    /// Begins a write transaction with the configured durability.
    fn begin_document_write(&self) -> Result<WriteTransaction> {
        let mut write_txn = self.db.begin_write().map_err(StorageError::from)?;
        write_txn.set_durability(match self.sync_mode {
            SyncMode::Normal => Durability::Immediate,
            SyncMode::Fast => Durability::Eventual,
        });
        Ok(write_txn)
    }
}

fn write_metadata(write_txn: &WriteTransaction, metadata: &IndexMetadata) -> Result<()> {
    let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
    let metadata_bytes =
        bincode::serialize(metadata).map_err(|e| StorageError::serialization(e.to_string()))?;
    meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;
    Ok(())
}

impl StorageEngine for RedbStorage {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    #[instrument(skip(self))]
    fn close(self: Box<Self>) -> Result<()> {
        info!("Closing storage engine");
        drop(self.db);
        info!("Storage engine closed");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    fn save_documents(&self, documents: &[(Document, Embedding)]) -> Result<Vec<DocumentId>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let paths: BTreeSet<&Path> = documents.iter().filter_map(|(doc, _)| doc.path()).collect();

        let write_txn = self.begin_document_write()?;
        let mut replaced = Vec::new();
        {
            let mut docs = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let mut by_path = write_txn.open_multimap_table(DOCUMENTS_BY_PATH_TABLE)?;

            for path in &paths {
                for entry in by_path.remove_all(encode_path_key(path))? {
                    let id = entry.map_err(StorageError::from)?;
                    replaced.push(DocumentId::from_bytes(*id.value()));
                }
            }
            for id in &replaced {
                docs.remove(id.as_bytes())?;
                embeddings.remove(id.as_bytes())?;
            }

            for (document, embedding) in documents {
                let bytes = bincode::serialize(document)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                docs.insert(document.id.as_bytes(), bytes.as_slice())?;

                let vector = encode_embedding(embedding);
                embeddings.insert(document.id.as_bytes(), vector.as_slice())?;

                if let Some(path) = document.path() {
                    by_path.insert(encode_path_key(path), document.id.as_bytes())?;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!(
            count = documents.len(),
            replaced = replaced.len(),
            "Documents saved"
        );
        Ok(replaced)
    }

    fn delete_documents_by_path(&self, path: &Path) -> Result<Vec<DocumentId>> {
        let write_txn = self.begin_document_write()?;
        let mut deleted = Vec::new();
        {
            let mut by_path = write_txn.open_multimap_table(DOCUMENTS_BY_PATH_TABLE)?;
            for entry in by_path.remove_all(encode_path_key(path))? {
                let id = entry.map_err(StorageError::from)?;
                deleted.push(DocumentId::from_bytes(*id.value()));
            }

            let mut docs = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            for id in &deleted {
                docs.remove(id.as_bytes())?;
                embeddings.remove(id.as_bytes())?;
            }
        }

        if deleted.is_empty() {
            // Nothing matched; drop the transaction without a commit
            return Ok(deleted);
        }

        write_txn.commit().map_err(StorageError::from)?;

        debug!(path = %path.display(), count = deleted.len(), "Documents deleted");
        Ok(deleted)
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        let mut documents = Vec::new();
        for result in table.iter()? {
            let (_, value) = result.map_err(StorageError::from)?;
            let document: Document = bincode::deserialize(value.value())
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            documents.push(document);
        }

        Ok(documents)
    }

    fn load_embeddings(&self) -> Result<Vec<(DocumentId, Embedding)>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(EMBEDDINGS_TABLE)?;
        let dimension = self.metadata.embedding_dimension.size();

        let mut embeddings = Vec::new();
        for result in table.iter()? {
            let (key, value) = result.map_err(StorageError::from)?;
            let id = DocumentId::from_bytes(*key.value());
            let embedding = decode_embedding(value.value())
                .filter(|v| v.len() == dimension)
                .ok_or_else(|| {
                    StorageError::corrupted(format!("Embedding for {id} has an invalid length"))
                })?;
            embeddings.push((id, embedding));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
impl RedbStorage {
    pub(crate) fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;

        match table.get(id.as_bytes())? {
            Some(value) => {
                let document: Document = bincode::deserialize(value.value())
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn document_ids_for_path(&self, path: &Path) -> Result<Vec<DocumentId>> {
        use ::redb::ReadableMultimapTable;

        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_multimap_table(DOCUMENTS_BY_PATH_TABLE)?;

        let mut ids = Vec::new();
        for entry in table.get(encode_path_key(path))? {
            let id = entry.map_err(StorageError::from)?;
            ids.push(DocumentId::from_bytes(*id.value()));
        }
        Ok(ids)
    }

    pub(crate) fn count_documents(&self) -> Result<u64> {
        use ::redb::ReadableTableMetadata;

        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        Ok(table.len()?)
    }
}

// RedbStorage is auto Send + Sync: Database, IndexMetadata, PathBuf and
// SyncMode are all Send + Sync.
