//! Deterministic feature-hashing embedder.
//!
//! ```text
//! Text → lowercase alphanumeric tokens → signed hash buckets → L2 normalize
//! ```
//!
//! Two texts sharing words land close together, which is all the index needs
//! to be exercised without a model server. Captions produced by real models
//! should use a learned embedder instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{l2_normalize, EmbeddingService};
use crate::error::{PixseekError, Result};
use crate::types::Embedding;

/// Offline embedding service based on the hashing trick.
///
/// Output is identical across runs and processes for the same build, so a
/// persisted index stays searchable after a restart.
#[derive(Clone, Debug)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    /// Creates a hashing embedder producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        // DefaultHasher::new() uses fixed keys, unlike RandomState
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let hash = hasher.finish();

        let index = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbeddingService for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Embedding> {
        if self.dimension == 0 {
            return Err(PixseekError::embedding("dimension must be greater than 0"));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let mut seen = 0usize;
        for token in tokens(text) {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
            seen += 1;
        }

        if seen == 0 {
            return Err(PixseekError::embedding(
                "cannot embed text without any alphanumeric token",
            ));
        }

        Ok(l2_normalize(&vector))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
