//! The image searcher: ingest, search and remove.
//!
//! [`ImageSearcher`] composes the [`DocumentBuilder`] and the [`VectorStore`]
//! and is the crate's primary interface.
//!
//! ```text
//! ingest(path) ─▶ DocumentBuilder ─▶ CaptionBatch ─▶ VectorStore::add
//!                      │ progress                         │
//!                      ▼                                  ▼
//!                   EventBus ◀──────────── Completed / Failed
//!
//! search(query) ─▶ VectorStore::search(k=20, fetch_k=30)
//!               ─▶ drop pathless ─▶ dedupe by path ─▶ prune missing files
//! ```
//!
//! # Thread Safety
//!
//! `ImageSearcher` is `Send + Sync`. The watcher and the worker pool share it
//! through an `Arc`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::caption::{create_captioner, Captioner};
use crate::config::{Config, WatchedDirectory};
use crate::document::builder::absolute_path;
use crate::document::{DocumentBuilder, IngestReport};
use crate::embedding::{create_embedding_service, EmbeddingService};
use crate::error::Result;
use crate::events::{EventBus, EventSubscription, IndexEvent};
use crate::index::VectorStore;

/// Number of distinct documents a query asks the index for.
pub const SEARCH_K: usize = 20;

/// Number of ANN candidates fetched before truncating to [`SEARCH_K`].
pub const SEARCH_FETCH_K: usize = 30;

/// Who asked for an ingest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngestSource {
    /// A caller acting on user input.
    #[default]
    Foreground,

    /// The change watcher. The in-memory index is reloaded from disk after
    /// the ingest so changes made by another handle become visible.
    Background,
}

/// Searchable collection of captioned images.
///
/// Create with [`ImageSearcher::open`] (services built from the config) or
/// [`ImageSearcher::with_services`] (services injected).
pub struct ImageSearcher {
    store: VectorStore,
    builder: DocumentBuilder,
    events: EventBus,
    config: Config,
}

impl std::fmt::Debug for ImageSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSearcher")
            .field("store", &self.store)
            .field("watched_directories", &self.config.watched_directories)
            .finish_non_exhaustive()
    }
}

impl ImageSearcher {
    /// Opens a searcher with the captioner and embedding service described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// - `Config` if a provider is `External` (use
    ///   [`with_services`](Self::with_services)) or needs a disabled feature
    /// - anything [`VectorStore::open`] returns
    #[instrument(skip(config), fields(path = %config.index_path.display()))]
    pub fn open(config: Config) -> Result<Self> {
        let captioner = create_captioner(&config)?;
        let embedder = create_embedding_service(&config)?;
        Self::with_services(config, captioner, embedder)
    }

    /// Opens a searcher around caller-provided services.
    #[instrument(skip_all, fields(path = %config.index_path.display()))]
    pub fn with_services(
        config: Config,
        captioner: Arc<dyn Captioner>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self> {
        let store = VectorStore::open(config.clone(), embedder)?;
        let events = EventBus::new(config.event_capacity);

        info!(
            documents = store.len()?,
            watched = config.watched_directories.len(),
            "Image searcher ready"
        );

        Ok(Self {
            store,
            builder: DocumentBuilder::new(captioner),
            events,
            config,
        })
    }

    /// Captions and indexes an image, or every image file directly inside a
    /// directory.
    ///
    /// Relative paths are resolved against the current directory, and events
    /// carry the resolved path. Re-ingesting an image replaces its previous
    /// captions. Directory ingests publish an [`IndexEvent::Progress`] after each file.
    /// Every call ends with [`IndexEvent::Completed`] or
    /// [`IndexEvent::Failed`]. A failed ingest stores nothing.
    ///
    /// # Errors
    ///
    /// - `Analysis` if a file is missing or cannot be described
    /// - `StructuredOutput` / `CaptionCount` if captioning fails
    /// - `BatchAborted` wrapping any of the above for directory ingests
    /// - `Embedding` / `Storage` if the index write fails
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn ingest(&self, path: impl AsRef<Path>, source: IngestSource) -> Result<IngestReport> {
        let path = &absolute_path(path.as_ref());

        match self.ingest_batch(path, source) {
            Ok(report) => {
                self.events.publish(IndexEvent::Completed {
                    path: path.to_path_buf(),
                    documents_added: report.documents_added,
                    files: report.files,
                });
                info!(
                    documents = report.documents_added,
                    files = report.files,
                    "Ingest complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.events.publish(IndexEvent::Failed {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
                warn!(error = %e, "Ingest failed");
                Err(e)
            }
        }
    }

    fn ingest_batch(&self, path: &Path, source: IngestSource) -> Result<IngestReport> {
        let events = &self.events;
        let batch = self.builder.build(path, &mut |progress| {
            events.publish(IndexEvent::Progress {
                path: path.to_path_buf(),
                file: progress.file.clone(),
                processed: progress.processed,
                total: progress.total,
                fraction: progress.fraction(),
            });
        })?;

        let ids = if batch.is_empty() {
            Vec::new()
        } else {
            self.store.add(&batch)?
        };

        if source == IngestSource::Background {
            self.store.load()?;
        }

        Ok(IngestReport {
            documents_added: ids.len(),
            files: batch.image_count(),
        })
    }

    /// Returns the paths of the images best matching `query`, best first.
    ///
    /// Each path appears at most once. Paths whose file no longer exists are
    /// removed from the index and left out. A query without a single letter
    /// or digit, or an empty index, yields an empty list.
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &str) -> Result<Vec<PathBuf>> {
        if !query.chars().any(char::is_alphanumeric) {
            return Ok(Vec::new());
        }

        let results = self.store.search(query, SEARCH_K, SEARCH_FETCH_K)?;

        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for result in results {
            let Some(path) = result.document.path() else {
                continue;
            };
            if !seen.insert(path.to_path_buf()) {
                continue;
            }

            if path.exists() {
                paths.push(path.to_path_buf());
            } else {
                debug!(path = %path.display(), "Pruning missing image");
                if let Err(e) = self.remove_stored(path) {
                    warn!(path = %path.display(), error = %e, "Failed to prune missing image");
                }
            }
        }

        debug!(returned = paths.len(), "Search complete");
        Ok(paths)
    }

    /// Removes every document for `path`. Unknown paths are a no-op.
    ///
    /// Relative paths are resolved the same way [`ingest`](Self::ingest)
    /// resolves them. Publishes [`IndexEvent::Removed`] when documents were
    /// deleted.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.remove_stored(&absolute_path(path.as_ref()))
    }

    /// Removes the documents stored under exactly `path`.
    fn remove_stored(&self, path: &Path) -> Result<usize> {
        let removed = self.store.remove(path)?;

        if removed > 0 {
            self.events.publish(IndexEvent::Removed {
                path: path.to_path_buf(),
                documents_removed: removed,
            });
        }
        Ok(removed)
    }

    /// Subscribes to ingest, progress and removal events.
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Returns the event bus this searcher publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Directories the change watcher should observe.
    #[inline]
    pub fn watched_directories(&self) -> &[WatchedDirectory] {
        &self.config.watched_directories
    }

    /// Returns the configuration this searcher was opened with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the underlying vector store.
    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Closes the index file.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing image searcher");
        self.store.close()
    }
}
