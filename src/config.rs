//! Configuration types for Pixseek.
//!
//! The [`Config`] struct controls index behavior including:
//! - Where the persisted index lives
//! - Which directories are watched for new images
//! - Embedding provider and dimension
//! - Captioner provider
//! - HNSW tuning, durability, debounce and worker settings
//!
//! # Example
//! ```rust
//! use pixseek::{Config, EmbeddingDimension, SyncMode, WatchedDirectory};
//!
//! // Use defaults (hashed embeddings, 384 dimensions, nothing watched)
//! let config = Config::default();
//!
//! // Customize
//! let config = Config {
//!     watched_directories: vec![WatchedDirectory::new("/home/me/Pictures")],
//!     embedding_dimension: EmbeddingDimension::D768,
//!     sync_mode: SyncMode::Fast,
//!     ..Default::default()
//! };
//! ```
//!
//! # File Format
//!
//! The watched-directory list is injected configuration. [`Config::from_json_file`]
//! reads it from a JSON document; every field is optional and falls back to
//! its default:
//!
//! ```json
//! {
//!   "index_path": "/home/me/.local/share/pixseek/image_index.redb",
//!   "watched_directories": [{ "path": "/home/me/Pictures", "recursive": true }],
//!   "embedding_provider": { "kind": "ollama", "url": "http://localhost:11434", "model": "qwen3-embedding:4b" },
//!   "embedding_dimension": { "Custom": 2560 },
//!   "captioner": { "kind": "ollama", "url": "http://localhost:11434",
//!                  "vision_model": "gemma3:4b", "caption_model": "qwen3:8b" },
//!   "debounce_ms": 1000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PixseekError, Result, ValidationError};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Index configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use pixseek::Config;
///
/// let config = Config {
///     debounce_ms: 250,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the persisted index file.
    pub index_path: PathBuf,

    /// Directories observed by the change watcher.
    pub watched_directories: Vec<WatchedDirectory>,

    /// How caption embeddings are generated.
    pub embedding_provider: EmbeddingProvider,

    /// Embedding vector dimension (must match provider output).
    pub embedding_dimension: EmbeddingDimension,

    /// How images are described and captioned.
    pub captioner: CaptionerProvider,

    /// HNSW tuning parameters.
    pub hnsw: HnswConfig,

    /// Durability mode for index writes.
    pub sync_mode: SyncMode,

    /// Settle delay between a file appearing and the watcher opening it.
    ///
    /// Default: 1000 ms
    pub debounce_ms: u64,

    /// Per-subscriber capacity of the notification channel.
    ///
    /// Default: 1024
    pub event_capacity: usize,

    /// Number of threads in the [`IndexWorker`](crate::IndexWorker) pool.
    ///
    /// Default: 1 (a single serializing actor)
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("image_index.redb"),
            watched_directories: Vec::new(),
            // Hashed is the safe default - no model server required
            embedding_provider: EmbeddingProvider::Hashed,
            embedding_dimension: EmbeddingDimension::D384,
            captioner: CaptionerProvider::External,
            hnsw: HnswConfig::default(),
            sync_mode: SyncMode::Normal,
            debounce_ms: 1000,
            event_capacity: 1024,
            worker_threads: 1,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config that talks to a local Ollama server for both the
    /// captioner and the embedder.
    ///
    /// Requires the `ollama` feature at runtime.
    ///
    /// # Example
    /// ```rust
    /// use pixseek::Config;
    ///
    /// let config = Config::with_ollama();
    /// assert_eq!(config.dimension(), 2560);
    /// ```
    pub fn with_ollama() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::Ollama {
                url: DEFAULT_OLLAMA_URL.to_string(),
                model: "qwen3-embedding:4b".to_string(),
            },
            // qwen3-embedding:4b produces 2560-dimensional vectors
            embedding_dimension: EmbeddingDimension::Custom(2560),
            captioner: CaptionerProvider::Ollama {
                url: DEFAULT_OLLAMA_URL.to_string(),
                vision_model: "gemma3:4b".to_string(),
                caption_model: "qwen3:8b".to_string(),
            },
            ..Default::default()
        }
    }

    /// Reads a configuration from a JSON file.
    ///
    /// Missing fields take their default values. The result is validated
    /// before it is returned.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Config` if it is not valid
    /// JSON for this schema, and `Validation` if a value is out of range.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&json).map_err(|e| {
            PixseekError::config(format!("Invalid config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `ImageSearcher::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `index_path` is empty
    /// - Custom dimension is 0 or > 4096
    /// - `event_capacity` or `worker_threads` is 0
    /// - an HNSW parameter is 0
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.index_path.as_os_str().is_empty() {
            return Err(ValidationError::required_field("index_path"));
        }

        // Validate custom dimension bounds
        if let EmbeddingDimension::Custom(dim) = self.embedding_dimension {
            if dim == 0 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must be greater than 0",
                ));
            }
            if dim > 4096 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must not exceed 4096",
                ));
            }
        }

        if self.event_capacity == 0 {
            return Err(ValidationError::invalid_field(
                "event_capacity",
                "must be greater than 0",
            ));
        }

        if self.worker_threads == 0 {
            return Err(ValidationError::invalid_field(
                "worker_threads",
                "must be greater than 0",
            ));
        }

        self.hnsw.validate()?;

        for dir in &self.watched_directories {
            if dir.path.as_os_str().is_empty() {
                return Err(ValidationError::invalid_field(
                    "watched_directories",
                    "directory path must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Returns the embedding dimension as a numeric value.
    pub fn dimension(&self) -> usize {
        self.embedding_dimension.size()
    }

    /// Returns the watcher settle delay.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// A root directory under live observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedDirectory {
    /// Absolute directory path.
    pub path: PathBuf,

    /// Whether sub-directories are observed as well.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

impl WatchedDirectory {
    /// Creates a recursive watch entry for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
        }
    }
}

/// Embedding provider configuration.
///
/// Determines how caption and query embeddings are generated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embedder, runs offline.
    #[default]
    Hashed,

    /// Embeddings from an Ollama server (`/api/embed`).
    ///
    /// Requires the `ollama` feature.
    Ollama {
        /// Server base URL.
        url: String,
        /// Embedding model name.
        model: String,
    },

    /// Caller injects an [`EmbeddingService`](crate::embedding::EmbeddingService)
    /// through `ImageSearcher::with_services`.
    External,
}

impl EmbeddingProvider {
    /// Returns true if this is the hashed provider.
    pub fn is_hashed(&self) -> bool {
        matches!(self, Self::Hashed)
    }

    /// Returns true if this is the external provider.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }
}

/// Captioner provider configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptionerProvider {
    /// Vision description and structured captions from an Ollama server.
    ///
    /// Requires the `ollama` feature.
    Ollama {
        /// Server base URL.
        url: String,
        /// Model used to describe the image.
        vision_model: String,
        /// Model used to turn the description into captions.
        caption_model: String,
    },

    /// Caller injects a [`Captioner`](crate::caption::Captioner) through
    /// `ImageSearcher::with_services`.
    #[default]
    External,
}

/// Embedding vector dimensions.
///
/// Standard dimensions are provided for common models. Use `Custom` for
/// other embedding services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDimension {
    /// 384 dimensions (default for the hashed embedder).
    #[default]
    D384,

    /// 768 dimensions (bge-base-en-v1.5, BERT-base).
    D768,

    /// Custom dimension for other embedding models.
    ///
    /// Must be between 1 and 4096.
    Custom(usize),
}

impl EmbeddingDimension {
    /// Returns the numeric size of this dimension.
    ///
    /// # Example
    /// ```rust
    /// use pixseek::EmbeddingDimension;
    ///
    /// assert_eq!(EmbeddingDimension::D384.size(), 384);
    /// assert_eq!(EmbeddingDimension::D768.size(), 768);
    /// assert_eq!(EmbeddingDimension::Custom(2560).size(), 2560);
    /// ```
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::D384 => 384,
            Self::D768 => 768,
            Self::Custom(n) => *n,
        }
    }
}

/// HNSW tuning parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum number of connections per node (M).
    pub max_nb_connection: usize,

    /// Candidate list size during construction.
    pub ef_construction: usize,

    /// Minimum candidate list size during search.
    ///
    /// The effective value is `max(ef_search, fetch_k)`.
    pub ef_search: usize,

    /// Maximum number of graph layers.
    pub max_layer: usize,

    /// Capacity hint for the graph.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layer: 16,
            max_elements: 100_000,
        }
    }
}

impl HnswConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        for (field, value) in [
            ("hnsw.max_nb_connection", self.max_nb_connection),
            ("hnsw.ef_construction", self.ef_construction),
            ("hnsw.ef_search", self.ef_search),
            ("hnsw.max_layer", self.max_layer),
            ("hnsw.max_elements", self.max_elements),
        ] {
            if value == 0 {
                return Err(ValidationError::invalid_field(field, "must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// Durability mode for write operations.
///
/// Controls the trade-off between write performance and crash safety.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on every commit.
    ///
    /// Every add/remove is durable before the call returns.
    #[default]
    Normal,

    /// Async sync (faster writes, may lose recent data on crash).
    ///
    /// A crash can roll the index back to an earlier commit, never to a
    /// half-written one.
    Fast,
}

impl SyncMode {
    /// Returns true if this mode is async (may lose data on crash).
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.embedding_provider.is_hashed());
        assert_eq!(config.embedding_dimension, EmbeddingDimension::D384);
        assert_eq!(config.captioner, CaptionerProvider::External);
        assert_eq!(config.sync_mode, SyncMode::Normal);
        assert_eq!(config.debounce(), Duration::from_secs(1));
        assert_eq!(config.worker_threads, 1);
        assert!(config.watched_directories.is_empty());
    }

    #[test]
    fn test_with_ollama() {
        let config = Config::with_ollama();
        assert!(matches!(
            config.embedding_provider,
            EmbeddingProvider::Ollama { .. }
        ));
        assert!(matches!(config.captioner, CaptionerProvider::Ollama { .. }));
        assert_eq!(config.dimension(), 2560);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_index_path() {
        let config = Config {
            index_path: PathBuf::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::RequiredField { field } if field == "index_path"));
    }

    #[test]
    fn test_validate_worker_threads_zero() {
        let config = Config {
            worker_threads: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidField { field, .. } if field == "worker_threads")
        );
    }

    #[test]
    fn test_validate_custom_dimension_zero() {
        let config = Config {
            embedding_dimension: EmbeddingDimension::Custom(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_custom_dimension_too_large() {
        let config = Config {
            embedding_dimension: EmbeddingDimension::Custom(5000),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_hnsw_zero() {
        let config = Config {
            hnsw: HnswConfig {
                ef_search: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidField { field, .. } if field == "hnsw.ef_search")
        );
    }

    #[test]
    fn test_watched_directory_defaults_to_recursive() {
        let dir: WatchedDirectory = serde_json::from_str(r#"{ "path": "/pictures" }"#).unwrap();
        assert!(dir.recursive);
        assert_eq!(dir, WatchedDirectory::new("/pictures"));
    }

    #[test]
    fn test_from_json_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "index_path": "/tmp/idx.redb",
                "watched_directories": [{ "path": "/pictures" }],
                "embedding_dimension": { "Custom": 64 },
                "debounce_ms": 50
            }"#,
        )
        .unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.index_path, PathBuf::from("/tmp/idx.redb"));
        assert_eq!(config.watched_directories.len(), 1);
        assert_eq!(config.dimension(), 64);
        assert_eq!(config.debounce(), Duration::from_millis(50));
        // Unspecified fields keep defaults
        assert!(config.embedding_provider.is_hashed());
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_from_json_file_tagged_providers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "embedding_provider": { "kind": "ollama", "url": "http://gpu:11434", "model": "m" },
                "captioner": { "kind": "external" }
            }"#,
        )
        .unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(
            config.embedding_provider,
            EmbeddingProvider::Ollama {
                url: "http://gpu:11434".to_string(),
                model: "m".to_string(),
            }
        );
        assert_eq!(config.captioner, CaptionerProvider::External);
    }

    #[test]
    fn test_from_json_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = Config::from_json_file(&path).unwrap_err();
        assert!(matches!(err, PixseekError::Config { .. }));
    }

    #[test]
    fn test_embedding_dimension_sizes() {
        assert_eq!(EmbeddingDimension::D384.size(), 384);
        assert_eq!(EmbeddingDimension::D768.size(), 768);
        assert_eq!(EmbeddingDimension::Custom(512).size(), 512);
    }

    #[test]
    fn test_sync_mode_checks() {
        assert!(!SyncMode::Normal.is_fast());
        assert!(SyncMode::Fast.is_fast());
    }

    #[test]
    fn test_embedding_dimension_serialization() {
        let dim = EmbeddingDimension::D768;
        let bytes = bincode::serialize(&dim).unwrap();
        let restored: EmbeddingDimension = bincode::deserialize(&bytes).unwrap();
        assert_eq!(dim, restored);
    }
}
