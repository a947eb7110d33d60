//! Embedding service abstractions for Pixseek.
//!
//! This module provides the trait and implementations for embedding generation.
//! Every caption is embedded once at ingest time; every query is embedded once
//! per search. Both must come from the same service or distances are
//! meaningless.
//!
//! # Providers
//!
//! - [`HashEmbedding`] - Deterministic feature hashing, offline, no model server
//! - `OllamaEmbedding` - Ollama `/api/embed` (requires `ollama` feature)
//!
//! # Example
//!
//! ```rust
//! use pixseek::embedding::{EmbeddingService, HashEmbedding};
//!
//! let service = HashEmbedding::new(384);
//! let embedding = service.embed("a cat sleeping on a red sofa").unwrap();
//! assert_eq!(embedding.len(), 384);
//! ```

pub mod hashed;
#[cfg(feature = "ollama")]
pub mod ollama;

use std::sync::Arc;

pub use hashed::HashEmbedding;

use crate::config::{Config, EmbeddingProvider};
use crate::error::{PixseekError, Result, ValidationError};
use crate::types::Embedding;

/// Embedding service trait for generating vector representations of text.
///
/// This trait defines the contract for any embedding provider. Implementations
/// must be thread-safe (`Send + Sync`) to allow concurrent embedding operations.
///
/// # Implementing a Custom Provider
///
/// ```rust,ignore
/// use pixseek::embedding::EmbeddingService;
/// use pixseek::{Embedding, Result};
///
/// struct MyEmbeddingService {
///     client: MyApiClient,
///     dimension: usize,
/// }
///
/// impl EmbeddingService for MyEmbeddingService {
///     fn embed(&self, text: &str) -> Result<Embedding> {
///         Ok(self.client.get_embedding(text)?)
///     }
///
///     fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
///         Ok(self.client.get_embeddings(texts)?)
///     }
///
///     fn dimension(&self) -> usize {
///         self.dimension
///     }
/// }
/// ```
pub trait EmbeddingService: Send + Sync {
    /// Generates an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Returns `PixseekError::Embedding` if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generates embeddings for multiple texts in a batch.
    ///
    /// Returns the embeddings in the same order as the input texts.
    ///
    /// # Errors
    ///
    /// Returns `PixseekError::Embedding` if any embedding generation fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Returns the dimension of embeddings produced by this service.
    fn dimension(&self) -> usize;

    /// Validates that an embedding has the correct dimension.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DimensionMismatch` if dimensions don't match.
    fn validate_embedding(&self, embedding: &Embedding) -> Result<()> {
        let expected = self.dimension();
        let actual = embedding.len();

        if actual != expected {
            return Err(PixseekError::Validation(
                ValidationError::dimension_mismatch(expected, actual),
            ));
        }

        Ok(())
    }
}

/// L2 normalizes a vector to unit length.
///
/// After normalization, cosine similarity reduces to a dot product.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Creates an embedding service based on the configuration.
///
/// # Errors
///
/// Returns an error if:
/// - the provider is `External` (inject one with `ImageSearcher::with_services`)
/// - Ollama embeddings are requested but the `ollama` feature is not enabled
pub fn create_embedding_service(config: &Config) -> Result<Arc<dyn EmbeddingService>> {
    let dimension = config.dimension();

    match &config.embedding_provider {
        EmbeddingProvider::Hashed => Ok(Arc::new(HashEmbedding::new(dimension))),

        #[cfg(feature = "ollama")]
        EmbeddingProvider::Ollama { url, model } => Ok(Arc::new(
            ollama::OllamaEmbedding::new(url, model, dimension),
        )),

        #[cfg(not(feature = "ollama"))]
        EmbeddingProvider::Ollama { .. } => Err(PixseekError::config(
            "Ollama embeddings require the 'ollama' feature",
        )),

        EmbeddingProvider::External => Err(PixseekError::config(
            "External embedding provider: supply one through ImageSearcher::with_services",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingDimension;

    #[test]
    fn test_validate_embedding_correct_dimension() {
        let service = HashEmbedding::new(3);
        let embedding = vec![1.0, 2.0, 3.0];
        assert!(service.validate_embedding(&embedding).is_ok());
    }

    #[test]
    fn test_validate_embedding_wrong_dimension() {
        let service = HashEmbedding::new(3);
        let embedding = vec![1.0, 2.0]; // Only 2 dimensions
        let err = service.validate_embedding(&embedding).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_l2_normalize_basic() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_create_embedding_service_hashed() {
        let config = Config {
            embedding_dimension: EmbeddingDimension::Custom(64),
            ..Default::default()
        };
        let service = create_embedding_service(&config).unwrap();
        assert_eq!(service.dimension(), 64);
    }

    #[test]
    fn test_create_embedding_service_external_is_config_error() {
        let config = Config {
            embedding_provider: EmbeddingProvider::External,
            ..Default::default()
        };
        let err = create_embedding_service(&config).err().unwrap();
        assert!(matches!(err, PixseekError::Config { .. }));
    }
}
