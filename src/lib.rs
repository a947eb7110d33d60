//! # Pixseek
//!
//! Local image library search: caption every image with a vision model,
//! embed the captions, and find images by describing them in plain text.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pixseek::{Config, ImageSearcher, IngestSource};
//!
//! // Ollama-backed captioner and embedder (feature `ollama`)
//! let searcher = ImageSearcher::open(Config {
//!     index_path: "./images.redb".into(),
//!     ..Config::with_ollama()
//! })?;
//!
//! // Caption and index every image directly inside a directory
//! searcher.ingest("/home/me/Pictures", IngestSource::Foreground)?;
//!
//! // Paths of the best matching images, best first, each at most once
//! for path in searcher.search("a dog on a beach at sunset")? {
//!     println!("{}", path.display());
//! }
//!
//! searcher.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Documents
//!
//! Every image becomes exactly [`CAPTIONS_PER_IMAGE`] documents: one per
//! generated caption, all pointing back at the image path. Documents are
//! added and removed per image, never individually.
//!
//! ### The index
//!
//! [`VectorStore`] persists documents and their embeddings in a single redb
//! file and answers similarity queries through an in-memory HNSW graph
//! rebuilt from that file on load.
//!
//! ### Background work
//!
//! - [`ChangeWatcher`] ingests images as they appear in the watched
//!   directories.
//! - [`IndexWorker`] runs ingest/search/remove off the caller's thread and
//!   hands back a [`Pending`] result (blocking or `async`).
//! - [`EventBus`] reports progress, completion, failures and removals.
//!
//! ## Features
//!
//! - `ollama` - Ollama-backed captioner and embedding service
//! - `cli` - the `pixseek` command line front end
//!
//! ## Thread Safety
//!
//! [`ImageSearcher`] is `Send + Sync` and can be shared across threads using
//! `Arc`. Writes to the index are serialized; searches run concurrently with
//! each other.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod error;
mod events;
mod index;
mod searcher;
mod types;
mod worker;

pub mod caption;
pub mod document;
pub mod embedding;
pub mod storage;

/// Vector index module for HNSW-based approximate nearest neighbor search.
pub mod vector;

pub mod watcher;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main interface
pub use searcher::{ImageSearcher, IngestSource, SEARCH_FETCH_K, SEARCH_K};

// Configuration
pub use config::{
    CaptionerProvider, Config, EmbeddingDimension, EmbeddingProvider, HnswConfig, SyncMode,
    WatchedDirectory, DEFAULT_OLLAMA_URL,
};

// Error handling
pub use error::{PixseekError, Result, StorageError, ValidationError};

// Core types
pub use types::{DocumentId, Embedding, Timestamp};

// Captioning and documents
pub use caption::{Captioner, CAPTIONS_PER_IMAGE};
pub use document::{CaptionBatch, Document, DocumentMetadata, IngestReport, ScoredDocument};

// Index
pub use embedding::{EmbeddingService, HashEmbedding};
pub use index::VectorStore;

// Background work and notifications
pub use events::{EventBus, EventSubscription, IndexEvent};
pub use watcher::{ChangeWatcher, WatcherReport, WatcherState};
pub use worker::{IndexWorker, Pending};

// Storage (for advanced users)
pub use storage::IndexMetadata;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common Pixseek usage.
///
/// ```rust
/// use pixseek::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, EmbeddingDimension, WatchedDirectory};
    pub use crate::error::{PixseekError, Result};
    pub use crate::events::IndexEvent;
    pub use crate::searcher::{ImageSearcher, IngestSource};
    pub use crate::watcher::ChangeWatcher;
    pub use crate::worker::IndexWorker;
}
