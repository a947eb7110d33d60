//! The persistent vector store.
//!
//! [`VectorStore`] keeps three things consistent:
//!
//! ```text
//! ┌────────────────────────────── RwLock ──────────────────────────────┐
//! │  RedbStorage (documents, embeddings, path index)  ← source of truth│
//! │  HnswIndex   (DocumentId → vector graph)          ← derived        │
//! │  HashMap     (DocumentId → Document)              ← derived        │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `add`, `remove` and `load` take the write lock; `search` and the read
//! accessors take the read lock. Embedding runs before the lock is taken so
//! model latency never blocks readers.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::document::{validate_batch, CaptionBatch, Document, ScoredDocument};
use crate::embedding::EmbeddingService;
use crate::error::{PixseekError, Result, ValidationError};
use crate::storage::{open_storage, StorageEngine};
use crate::types::{DocumentId, Embedding, Timestamp};
use crate::vector::HnswIndex;

/// In-memory view of an index file that exists on disk.
struct LoadedIndex {
    storage: Box<dyn StorageEngine>,
    hnsw: HnswIndex,
    documents: HashMap<DocumentId, Document>,
}

impl LoadedIndex {
    /// Rebuilds the derived structures from storage.
    fn rebuild(storage: Box<dyn StorageEngine>, config: &Config) -> Result<Self> {
        let embeddings = storage.load_embeddings()?;
        let documents: HashMap<DocumentId, Document> = storage
            .list_documents()?
            .into_iter()
            .map(|doc| (doc.id, doc))
            .collect();

        if embeddings.len() != documents.len()
            || embeddings.iter().any(|(id, _)| !documents.contains_key(id))
        {
            return Err(PixseekError::consistency(format!(
                "index file holds {} documents but {} embeddings",
                documents.len(),
                embeddings.len()
            )));
        }

        let hnsw = HnswIndex::rebuild_from_embeddings(config.dimension(), &config.hnsw, embeddings)?;

        Ok(Self {
            storage,
            hnsw,
            documents,
        })
    }
}

/// Persistent collection of embedded caption documents.
///
/// # Thread Safety
///
/// `VectorStore` is `Send + Sync`; share it with an `Arc`. All mutations are
/// serialized by an internal `RwLock`.
pub struct VectorStore {
    config: Config,
    embedder: Arc<dyn EmbeddingService>,
    state: RwLock<Option<LoadedIndex>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("index_path", &self.config.index_path)
            .field("dimension", &self.config.dimension())
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Opens the store described by `config` and loads any persisted index.
    ///
    /// # Errors
    ///
    /// - `Validation` if the config is invalid or `embedder` produces a
    ///   different dimension than configured
    /// - `Storage` if the index file is locked, corrupted or from another
    ///   schema version
    #[instrument(skip(config, embedder), fields(path = %config.index_path.display()))]
    pub fn open(config: Config, embedder: Arc<dyn EmbeddingService>) -> Result<Self> {
        config.validate()?;

        if embedder.dimension() != config.dimension() {
            return Err(ValidationError::dimension_mismatch(
                config.dimension(),
                embedder.dimension(),
            )
            .into());
        }

        let store = Self {
            config,
            embedder,
            state: RwLock::new(None),
        };
        store.load()?;
        Ok(store)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, Option<LoadedIndex>>> {
        self.state
            .read()
            .map_err(|_| PixseekError::consistency("vector store lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, Option<LoadedIndex>>> {
        self.state
            .write()
            .map_err(|_| PixseekError::consistency("vector store lock poisoned"))
    }

    /// Reloads the in-memory state from the index file.
    ///
    /// If no index file exists yet the store becomes empty; the file is
    /// created by the first non-empty [`add`](Self::add). Safe to call
    /// repeatedly.
    #[instrument(skip(self))]
    pub fn load(&self) -> Result<()> {
        let mut state = self.write_state()?;

        let storage = match state.take() {
            Some(loaded) => Some(loaded.storage),
            None if self.config.index_path.exists() => {
                Some(open_storage(&self.config.index_path, &self.config)?)
            }
            None => None,
        };

        *state = match storage {
            Some(storage) => {
                let loaded = LoadedIndex::rebuild(storage, &self.config)?;
                info!(documents = loaded.documents.len(), "Index loaded");
                Some(loaded)
            }
            None => {
                debug!("No index file yet, starting empty");
                None
            }
        };

        Ok(())
    }

    /// Embeds and stores every caption in `batch`.
    ///
    /// Documents already indexed for an image path in the batch are replaced,
    /// so an image owns only the captions of its latest ingest. The whole
    /// batch is one storage transaction: on error nothing is stored or
    /// replaced. Creates the index file if it does not exist yet. Returns the
    /// ids of the new documents, in batch order.
    ///
    /// # Errors
    ///
    /// - `Validation` if captions and metadata differ in length or a caption
    ///   is blank
    /// - `Embedding` if the embedding service fails or returns vectors of the
    ///   wrong size
    /// - `Storage` if the write transaction fails
    #[instrument(skip(self, batch), fields(captions = batch.len()))]
    pub fn add(&self, batch: &CaptionBatch) -> Result<Vec<DocumentId>> {
        validate_batch(batch)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = batch.captions.iter().map(String::as_str).collect();
        let embeddings = self.embed_checked(&texts)?;

        let created_at = Timestamp::now();
        let entries: Vec<(Document, Embedding)> = batch
            .captions
            .iter()
            .zip(&batch.metadata)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| {
                let document = Document {
                    id: DocumentId::new(),
                    text: text.clone(),
                    metadata: metadata.clone(),
                    created_at,
                };
                (document, embedding)
            })
            .collect();

        let mut state = self.write_state()?;
        if state.is_none() {
            let storage = open_storage(&self.config.index_path, &self.config)?;
            *state = Some(LoadedIndex {
                storage,
                hnsw: HnswIndex::new(self.config.dimension(), &self.config.hnsw),
                documents: HashMap::new(),
            });
        }
        let loaded = state
            .as_mut()
            .ok_or_else(|| PixseekError::consistency("index missing after creation"))?;

        let replaced = loaded.storage.save_documents(&entries)?;
        for id in &replaced {
            loaded.hnsw.delete_document(*id)?;
            loaded.documents.remove(id);
        }

        let vectors: Vec<(DocumentId, Embedding)> = entries
            .iter()
            .map(|(doc, embedding)| (doc.id, embedding.clone()))
            .collect();
        loaded.hnsw.insert_documents(&vectors).map_err(|e| {
            PixseekError::consistency(format!("stored documents missing from ANN graph: {e}"))
        })?;

        let ids: Vec<DocumentId> = entries.iter().map(|(doc, _)| doc.id).collect();
        for (document, _) in entries {
            loaded.documents.insert(document.id, document);
        }

        info!(
            added = ids.len(),
            replaced = replaced.len(),
            total = loaded.documents.len(),
            "Documents added"
        );
        Ok(ids)
    }

    fn embed_checked(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let embeddings = self.embedder.embed_batch(texts)?;

        if embeddings.len() != texts.len() {
            return Err(PixseekError::embedding(format!(
                "embedding service returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        let dimension = self.config.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(PixseekError::embedding(format!(
                "embedding service returned {} dimensions, index expects {dimension}",
                bad.len()
            )));
        }

        Ok(embeddings)
    }

    /// Deletes every document whose metadata path equals `path`.
    ///
    /// Returns the number of documents removed; 0 (not an error) if none
    /// matched.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn remove(&self, path: &Path) -> Result<usize> {
        let mut state = self.write_state()?;
        let Some(loaded) = state.as_mut() else {
            return Ok(0);
        };

        let deleted = loaded.storage.delete_documents_by_path(path)?;

        let mut missing = 0usize;
        for id in &deleted {
            loaded.hnsw.delete_document(*id)?;
            if loaded.documents.remove(id).is_none() {
                missing += 1;
            }
        }

        if missing > 0 {
            warn!(missing, "Deleted documents were not in memory");
            return Err(PixseekError::consistency(format!(
                "{missing} of {} deleted documents for {} were unknown in memory",
                deleted.len(),
                path.display()
            )));
        }

        if !deleted.is_empty() {
            info!(removed = deleted.len(), "Documents removed");
        }
        Ok(deleted.len())
    }

    /// Returns the `k` documents closest to `query`.
    ///
    /// Up to `fetch_k` candidates are retrieved from the graph (with
    /// `ef = max(hnsw.ef_search, fetch_k)`) and the best `k` by distance are
    /// returned, closest first. An empty index yields an empty result.
    ///
    /// # Errors
    ///
    /// - `Validation` if `fetch_k < k`
    /// - `Embedding` if the query cannot be embedded
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &str, k: usize, fetch_k: usize) -> Result<Vec<ScoredDocument>> {
        if fetch_k < k {
            return Err(ValidationError::invalid_field(
                "fetch_k",
                format!("must be at least k ({k}), got {fetch_k}"),
            )
            .into());
        }
        if k == 0 || self.is_empty()? {
            return Ok(Vec::new());
        }

        let embedding = self.embed_checked(&[query])?;
        let embedding = embedding
            .first()
            .ok_or_else(|| PixseekError::embedding("no embedding returned for query"))?;

        let state = self.read_state()?;
        let Some(loaded) = state.as_ref() else {
            return Ok(Vec::new());
        };

        let ef = self.config.hnsw.ef_search.max(fetch_k);
        let candidates = loaded.hnsw.search_documents(embedding, fetch_k, ef)?;

        let mut results = Vec::with_capacity(candidates.len());
        for (id, distance) in candidates {
            let document = loaded.documents.get(&id).ok_or_else(|| {
                PixseekError::consistency(format!("ANN graph returned unknown document {id}"))
            })?;
            results.push(ScoredDocument::new(document.clone(), distance));
        }

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(k);

        debug!(returned = results.len(), "Search complete");
        Ok(results)
    }

    /// Iterates over a snapshot of every stored document, oldest first.
    pub fn all_documents(&self) -> Result<std::vec::IntoIter<Document>> {
        let state = self.read_state()?;
        let mut documents: Vec<Document> = state
            .as_ref()
            .map(|loaded| loaded.documents.values().cloned().collect())
            .unwrap_or_default();
        documents.sort_by_key(|doc| doc.id);
        Ok(documents.into_iter())
    }

    /// Returns the set of image paths that have documents in the index.
    pub fn all_paths(&self) -> Result<BTreeSet<PathBuf>> {
        let state = self.read_state()?;
        Ok(state
            .as_ref()
            .map(|loaded| {
                loaded
                    .documents
                    .values()
                    .filter_map(|doc| doc.metadata.path.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Counts the documents whose metadata path equals `path`.
    pub fn count_for_path(&self, path: &Path) -> Result<usize> {
        let state = self.read_state()?;
        Ok(state.as_ref().map_or(0, |loaded| {
            loaded
                .documents
                .values()
                .filter(|doc| doc.metadata.refers_to(path))
                .count()
        }))
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize> {
        let state = self.read_state()?;
        Ok(state.as_ref().map_or(0, |loaded| loaded.documents.len()))
    }

    /// Returns true if no documents are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Writes a numbered, human-readable listing of every document to `file`.
    ///
    /// Format per document:
    ///
    /// ```text
    /// 1 -> Path : /photos/cat.png
    /// Caption : a grey cat asleep on a sofa
    ///
    /// ```
    ///
    /// Returns the number of documents written.
    #[instrument(skip(self), fields(file = %file.display()))]
    pub fn export_text(&self, file: &Path) -> Result<usize> {
        let mut out = BufWriter::new(File::create(file)?);
        let mut written = 0usize;

        for (index, document) in self.all_documents()?.enumerate() {
            let path = document
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            write!(
                out,
                "{} -> Path : {}\nCaption : {}\n\n",
                index + 1,
                path,
                document.text
            )?;
            written += 1;
        }
        out.flush()?;

        info!(documents = written, "Index exported");
        Ok(written)
    }

    /// Returns true once the index file exists on disk.
    pub fn is_persisted(&self) -> Result<bool> {
        Ok(self.read_state()?.is_some())
    }

    /// Location of the index file.
    pub fn index_path(&self) -> &Path {
        &self.config.index_path
    }

    /// Embedding dimension of the store.
    pub fn dimension(&self) -> usize {
        self.config.dimension()
    }

    /// Closes the index file.
    pub fn close(self) -> Result<()> {
        let state = self
            .state
            .into_inner()
            .map_err(|_| PixseekError::consistency("vector store lock poisoned"))?;
        if let Some(loaded) = state {
            loaded.storage.close()?;
        }
        Ok(())
    }
}
