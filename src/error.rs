//! Error types for Pixseek.
//!
//! Pixseek uses a hierarchical error system:
//! - `PixseekError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`) provide detail
//!
//! The variants follow the stages of the indexing pipeline:
//!
//! | Stage                  | Variant                                   |
//! |------------------------|-------------------------------------------|
//! | Vision description     | [`PixseekError::Analysis`]                |
//! | Structured captioning  | [`PixseekError::StructuredOutput`], [`PixseekError::CaptionCount`] |
//! | Embedding / index      | [`PixseekError::Embedding`], [`PixseekError::Storage`] |
//! | Internal bookkeeping   | [`PixseekError::IndexConsistency`]        |
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use pixseek::{ImageSearcher, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let searcher = ImageSearcher::open(Config::default())?;
//!     searcher.ingest("/photos/cat.png", IngestSource::Foreground)?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Pixseek operations.
pub type Result<T> = std::result::Result<T, PixseekError>;

/// Top-level error enum for all Pixseek operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching to handle specific error cases.
#[derive(Debug, Error)]
pub enum PixseekError {
    /// The vision-description step failed: missing file, undecodable image,
    /// or unreachable model.
    #[error("Analysis failed for {path}: {reason}")]
    Analysis {
        /// Image that could not be described.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The captioning model produced output that could not be read as a
    /// list of captions.
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// The captioning step did not yield exactly the expected number of
    /// distinct captions.
    #[error("Caption count mismatch for {path}: expected {expected} distinct captions, got {got}")]
    CaptionCount {
        /// Image whose captions were rejected.
        path: PathBuf,
        /// Required number of distinct captions.
        expected: usize,
        /// Number of distinct non-empty captions received.
        got: usize,
    },

    /// A directory ingest stopped at `file`; nothing from the batch was indexed.
    #[error("Directory ingest aborted at {file} ({position} of {total}): {source}")]
    BatchAborted {
        /// File that failed.
        file: PathBuf,
        /// 1-based position of the failed file in enumeration order.
        position: usize,
        /// Number of files in the batch.
        total: usize,
        /// Underlying failure.
        #[source]
        source: Box<PixseekError>,
    },

    /// Embedding generation/validation error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The id ↔ document mapping and the ANN structure disagree.
    #[error("Index consistency error: {0}")]
    IndexConsistency(String),

    /// Vector index error (HNSW operations).
    #[error("Vector index error: {0}")]
    Vector(String),

    /// Storage layer error (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// File system watcher error.
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// The worker pool shut down before the job produced a result.
    #[error("Index worker stopped before completing the request")]
    WorkerStopped,

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PixseekError {
    /// Creates an analysis error for the given image.
    pub fn analysis(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Analysis {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a structured output error with the given message.
    pub fn structured_output(msg: impl Into<String>) -> Self {
        Self::StructuredOutput(msg.into())
    }

    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an embedding error with the given message.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Creates an index consistency error with the given message.
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::IndexConsistency(msg.into())
    }

    /// Creates a vector index error with the given message.
    pub fn vector(msg: impl Into<String>) -> Self {
        Self::Vector(msg.into())
    }

    /// Creates a watcher error with the given message.
    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }

    /// Returns the innermost error, looking through [`PixseekError::BatchAborted`].
    pub fn root_cause(&self) -> &PixseekError {
        match self {
            Self::BatchAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Model and backend failures are transient; caption-count rejections
    /// and validation failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Analysis { .. }
                | Self::StructuredOutput(_)
                | Self::Embedding(_)
                | Self::Storage(StorageError::DatabaseLocked)
                | Self::Io(_)
        )
    }

    /// Returns true if this is an analysis error.
    pub fn is_analysis(&self) -> bool {
        matches!(self.root_cause(), Self::Analysis { .. })
    }

    /// Returns true if this is a caption count error.
    pub fn is_caption_count(&self) -> bool {
        matches!(self.root_cause(), Self::CaptionCount { .. })
    }

    /// Returns true if this is an embedding error.
    pub fn is_embedding(&self) -> bool {
        matches!(self.root_cause(), Self::Embedding(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a vector index error.
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }
}

/// Storage-related errors.
///
/// These errors indicate problems with the persisted index file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Index file or data is corrupted.
    #[error("Index corrupted: {0}")]
    Corrupted(String),

    /// Index file is locked by another process.
    #[error("Index is locked by another process")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Index schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in the index file.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

// Conversions from redb error types
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Also allow direct conversion to PixseekError for convenience
impl From<redb::TransactionError> for PixseekError {
    fn from(err: redb::TransactionError) -> Self {
        PixseekError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for PixseekError {
    fn from(err: redb::CommitError) -> Self {
        PixseekError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for PixseekError {
    fn from(err: redb::TableError) -> Self {
        PixseekError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for PixseekError {
    fn from(err: redb::StorageError) -> Self {
        PixseekError::Storage(StorageError::from(err))
    }
}

impl From<bincode::Error> for PixseekError {
    fn from(err: bincode::Error) -> Self {
        PixseekError::Storage(StorageError::from(err))
    }
}

impl From<notify::Error> for PixseekError {
    fn from(err: notify::Error) -> Self {
        PixseekError::Watcher(err.to_string())
    }
}

/// Validation errors for input data.
///
/// These errors indicate problems with data provided by the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Embedding dimension doesn't match the index's configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from the index configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Two parallel sequences that must line up have different lengths.
    #[error("Length mismatch between '{left}' ({left_len}) and '{right}' ({right_len})")]
    LengthMismatch {
        /// Name of the first sequence.
        left: String,
        /// Length of the first sequence.
        left_len: usize,
        /// Name of the second sequence.
        right: String,
        /// Length of the second sequence.
        right_len: usize,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a length mismatch error.
    pub fn length_mismatch(
        left: impl Into<String>,
        left_len: usize,
        right: impl Into<String>,
        right_len: usize,
    ) -> Self {
        Self::LengthMismatch {
            left: left.into(),
            left_len,
            right: right.into(),
            right_len,
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }
}
