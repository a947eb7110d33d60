//! Embeddings from an Ollama server.
//!
//! Requires the `ollama` feature. Uses the batch endpoint:
//!
//! ```text
//! POST {url}/api/embed  {"model": "...", "input": ["text", ...]}
//!   → {"embeddings": [[f32; dim], ...]}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ureq::Agent;

use super::EmbeddingService;
use crate::error::{PixseekError, Result};
use crate::types::Embedding;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding service backed by Ollama's `/api/embed`.
pub struct OllamaEmbedding {
    agent: Agent,
    embed_url: String,
    model: String,
    dimension: usize,
}

impl std::fmt::Debug for OllamaEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedding")
            .field("embed_url", &self.embed_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedding {
    /// Creates a client for `model` on the server at `url`.
    ///
    /// `dimension` must match what the model produces; every response is
    /// checked against it.
    pub fn new(url: &str, model: &str, dimension: usize) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();

        Self {
            agent,
            embed_url: format!("{}/api/embed", url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        }
    }
}

impl EmbeddingService for OllamaEmbedding {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| PixseekError::embedding("server returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(PixseekError::embedding("cannot embed empty text"));
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut response = self
            .agent
            .post(&self.embed_url)
            .send_json(&request)
            .map_err(|e| {
                PixseekError::embedding(format!("request to {} failed: {e}", self.embed_url))
            })?;

        let parsed: EmbedResponse = response.body_mut().read_json().map_err(|e| {
            PixseekError::embedding(format!("unreadable response from {}: {e}", self.embed_url))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(PixseekError::embedding(format!(
                "expected {} embeddings, server returned {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        for embedding in &parsed.embeddings {
            if embedding.len() != self.dimension {
                return Err(PixseekError::embedding(format!(
                    "model {} produced {} dimensions, index expects {}",
                    self.model,
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        debug!(count = texts.len(), "Embedded batch via Ollama");
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_url_normalised() {
        let service = OllamaEmbedding::new("http://localhost:11434/", "m", 8);
        assert_eq!(service.embed_url, "http://localhost:11434/api/embed");
        assert_eq!(service.dimension(), 8);
    }

    #[test]
    fn test_empty_batch_skips_request() {
        let service = OllamaEmbedding::new("http://127.0.0.1:9", "m", 8);
        assert!(service.embed_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_blank_text_rejected_before_request() {
        let service = OllamaEmbedding::new("http://127.0.0.1:9", "m", 8);
        assert!(service.embed("   ").unwrap_err().is_embedding());
    }

    #[test]
    fn test_unreachable_server_is_embedding_error() {
        let service = OllamaEmbedding::new("http://127.0.0.1:9", "m", 8);
        assert!(service.embed("hello").unwrap_err().is_embedding());
    }
}
