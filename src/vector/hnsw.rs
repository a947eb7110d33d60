//! HNSW vector index implementation using hnsw_rs.
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistCosine>` with:
//! - Bidirectional `DocumentId` ↔ `usize` ID mapping
//! - Soft-delete via `HashSet` + filtered search
//!
//! # Thread Safety
//!
//! The `hnsw_rs::Hnsw` graph uses `parking_lot::RwLock` internally,
//! so `insert()` takes `&self`. Our mapping (`IndexState`) is
//! protected by `std::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use hnsw_rs::prelude::*;

use crate::config::HnswConfig;
use crate::error::{PixseekError, Result};
use crate::types::DocumentId;

/// HNSW vector index backed by `hnsw_rs`.
///
/// The graph is never persisted. It is rebuilt from the embeddings stored in
/// redb whenever the index is loaded, which also drops soft-deleted points.
pub struct HnswIndex {
    /// The underlying HNSW graph. Uses `'static` lifetime because
    /// all data is heap-owned (not memory-mapped).
    hnsw: Hnsw<'static, f32, DistCosine>,

    /// Mutable mapping protected by RwLock.
    state: RwLock<IndexState>,

    /// Embedding dimension (must match all inserted vectors).
    dimension: usize,
}

/// Internal mutable state for ID mapping and soft-deletion.
#[derive(Debug, Default)]
struct IndexState {
    /// Forward map: DocumentId → internal usize ID.
    id_to_internal: HashMap<DocumentId, usize>,

    /// Reverse map: internal usize ID → DocumentId.
    /// Uses Vec for O(1) lookup by index.
    internal_to_id: Vec<DocumentId>,

    /// Set of soft-deleted internal IDs (excluded from search).
    deleted: HashSet<usize>,
}

impl IndexState {
    /// Assigns the next internal id to `doc_id`, or `None` if already mapped.
    fn assign(&mut self, doc_id: DocumentId) -> Option<usize> {
        if self.id_to_internal.contains_key(&doc_id) {
            return None;
        }
        let internal_id = self.internal_to_id.len();
        self.id_to_internal.insert(doc_id, internal_id);
        self.internal_to_id.push(doc_id);
        Some(internal_id)
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    /// Creates a new empty HNSW index.
    ///
    /// # Arguments
    ///
    /// * `dimension` - Expected embedding dimension (validated on insert)
    /// * `config` - HNSW tuning parameters
    pub fn new(dimension: usize, config: &HnswConfig) -> Self {
        let hnsw = Hnsw::new(
            config.max_nb_connection,
            config.max_elements,
            config.max_layer,
            config.ef_construction,
            DistCosine,
        );

        Self {
            hnsw,
            state: RwLock::new(IndexState::default()),
            dimension,
        }
    }

    fn check_dimension(&self, what: &str, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(PixseekError::vector(format!(
                "{what} dimension mismatch: expected {}, got {len}",
                self.dimension
            )));
        }
        Ok(())
    }

    /// Inserts a document embedding into the index.
    ///
    /// If the DocumentId is already present, this is a no-op.
    pub fn insert_document(&self, doc_id: DocumentId, embedding: &[f32]) -> Result<()> {
        self.check_dimension("Embedding", embedding.len())?;

        let mut state = self
            .state
            .write()
            .map_err(|_| PixseekError::vector("Index state lock poisoned"))?;
        let Some(internal_id) = state.assign(doc_id) else {
            return Ok(());
        };

        // Drop the lock before calling hnsw insert (which acquires its own lock)
        drop(state);

        self.hnsw.insert((embedding, internal_id));
        Ok(())
    }

    /// Inserts a batch of document embeddings.
    ///
    /// Every embedding is validated before anything is inserted, so a
    /// rejected batch leaves the index untouched.
    pub fn insert_documents(&self, items: &[(DocumentId, Vec<f32>)]) -> Result<()> {
        for (_, embedding) in items {
            self.check_dimension("Embedding", embedding.len())?;
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| PixseekError::vector("Index state lock poisoned"))?;

        let mut batch: Vec<(&Vec<f32>, usize)> = Vec::with_capacity(items.len());
        for (doc_id, embedding) in items {
            if let Some(internal_id) = state.assign(*doc_id) {
                batch.push((embedding, internal_id));
            }
        }
        drop(state);

        if !batch.is_empty() {
            // Parallel bulk insert (uses rayon internally)
            self.hnsw.parallel_insert(&batch);
        }
        Ok(())
    }

    /// Marks a document as deleted in the index.
    ///
    /// The vector remains in the graph but is excluded from search
    /// results via filtered search. Returns Ok even if the document
    /// is not in the index (idempotent).
    pub fn delete_document(&self, doc_id: DocumentId) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| PixseekError::vector("Index state lock poisoned"))?;

        if let Some(&internal_id) = state.id_to_internal.get(&doc_id) {
            state.deleted.insert(internal_id);
        }

        Ok(())
    }

    /// Searches for the k nearest documents, excluding deleted ones.
    ///
    /// Returns `(DocumentId, distance)` pairs sorted by distance
    /// ascending (closest first). Distance is cosine distance:
    /// 0.0 = identical, 2.0 = opposite.
    pub fn search_documents(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        self.check_dimension("Query", query.len())?;

        let state = self
            .state
            .read()
            .map_err(|_| PixseekError::vector("Index state lock poisoned"))?;

        if k == 0 || state.id_to_internal.len() == state.deleted.len() {
            return Ok(Vec::new());
        }

        // A concrete closure auto-implements hnsw_rs::FilterT
        let deleted_ref = &state.deleted;
        let filter_fn = |id: &usize| -> bool { !deleted_ref.contains(id) };
        let results = if state.deleted.is_empty() {
            self.hnsw.search(query, k, ef_search)
        } else {
            self.hnsw
                .search_filter(query, k, ef_search, Some(&filter_fn))
        };

        let mut mapped: Vec<(DocumentId, f32)> = results
            .into_iter()
            .filter_map(|n| {
                state
                    .internal_to_id
                    .get(n.d_id)
                    .map(|&doc_id| (doc_id, n.distance))
            })
            .collect();
        mapped.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(mapped)
    }

    /// Returns true if the given document is in the index (and not deleted).
    pub fn contains(&self, doc_id: DocumentId) -> bool {
        let state = self.state.read().ok();
        state.is_some_and(|s| {
            s.id_to_internal
                .get(&doc_id)
                .is_some_and(|id| !s.deleted.contains(id))
        })
    }

    /// Returns the number of active (non-deleted) vectors.
    pub fn active_count(&self) -> usize {
        let state = self.state.read().ok();
        state.map_or(0, |s| s.id_to_internal.len() - s.deleted.len())
    }

    /// Returns true if the index has no active vectors.
    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Returns the total number of vectors (including deleted).
    pub fn total_count(&self) -> usize {
        self.hnsw.get_nb_point()
    }

    /// Returns the embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Rebuilds an index from a set of embeddings.
    ///
    /// Used by `VectorStore::load()` to reconstruct the HNSW graph
    /// from embeddings stored in redb (the source of truth).
    pub fn rebuild_from_embeddings(
        dimension: usize,
        config: &HnswConfig,
        embeddings: Vec<(DocumentId, Vec<f32>)>,
    ) -> Result<Self> {
        let index = Self::new(dimension, config);
        index.insert_documents(&embeddings)?;
        Ok(index)
    }
}

// ==========================================================================
// Tests
// ==========================================================================
