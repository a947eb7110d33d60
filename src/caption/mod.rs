//! Captioner abstractions for Pixseek.
//!
//! Turning an image into searchable text is a two-step pipeline:
//!
//! ```text
//! image ──describe──▶ description ──caption──▶ 7 distinct captions
//! ```
//!
//! Both steps are model calls with multi-second latency, so the crate never
//! runs them while holding the index lock. The [`Captioner`] trait is the
//! seam; [`ollama::OllamaCaptioner`] is the bundled implementation
//! (requires the `ollama` feature).

#[cfg(feature = "ollama")]
pub mod ollama;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::{CaptionerProvider, Config};
use crate::error::{PixseekError, Result};

/// Number of captions generated for every image.
///
/// Each caption becomes one document in the index, so an image always owns
/// exactly this many documents.
pub const CAPTIONS_PER_IMAGE: usize = 7;

/// Describes images and derives captions from the description.
///
/// Implementations must be thread-safe (`Send + Sync`); the searcher shares
/// one instance between caller threads, the worker pool and the watcher.
///
/// # Implementing a Custom Captioner
///
/// ```rust,ignore
/// use std::path::Path;
/// use pixseek::caption::Captioner;
/// use pixseek::Result;
///
/// struct MyCaptioner { client: MyVisionClient }
///
/// impl Captioner for MyCaptioner {
///     fn describe(&self, image: &Path) -> Result<String> {
///         self.client.describe(image)
///     }
///
///     fn caption(&self, description: &str) -> Result<Vec<String>> {
///         self.client.captions(description)
///     }
/// }
/// ```
pub trait Captioner: Send + Sync {
    /// Produces one detailed description of the image at `image`.
    ///
    /// # Errors
    ///
    /// Returns `PixseekError::Analysis` if the file cannot be read or decoded,
    /// or the model is unreachable.
    fn describe(&self, image: &Path) -> Result<String>;

    /// Produces [`CAPTIONS_PER_IMAGE`] semantically distinct captions for a
    /// description.
    ///
    /// Callers do not trust the count; see [`validate_captions`].
    ///
    /// # Errors
    ///
    /// Returns `PixseekError::StructuredOutput` if the model output cannot be
    /// read as a list of strings.
    fn caption(&self, description: &str) -> Result<Vec<String>>;
}

/// Enforces the caption cardinality contract.
///
/// Trims every caption and requires exactly [`CAPTIONS_PER_IMAGE`] captions,
/// all non-empty and pairwise distinct. Returns the trimmed captions in their
/// original order.
///
/// # Errors
///
/// Returns `PixseekError::CaptionCount` carrying the number of distinct
/// non-empty captions actually received.
pub fn validate_captions(image: &Path, captions: Vec<String>) -> Result<Vec<String>> {
    let trimmed: Vec<String> = captions.iter().map(|c| c.trim().to_string()).collect();

    let distinct: HashSet<&str> = trimmed
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .collect();

    if trimmed.len() != CAPTIONS_PER_IMAGE || distinct.len() != CAPTIONS_PER_IMAGE {
        return Err(PixseekError::CaptionCount {
            path: image.to_path_buf(),
            expected: CAPTIONS_PER_IMAGE,
            got: distinct.len(),
        });
    }

    Ok(trimmed)
}

/// Returns true if the path's extension maps to an `image/*` MIME type.
pub fn is_image_path(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Creates a captioner based on the configuration.
///
/// # Errors
///
/// Returns an error if:
/// - the provider is `External` (inject one with `ImageSearcher::with_services`)
/// - Ollama is requested but the `ollama` feature is not enabled
pub fn create_captioner(config: &Config) -> Result<Arc<dyn Captioner>> {
    match &config.captioner {
        #[cfg(feature = "ollama")]
        CaptionerProvider::Ollama {
            url,
            vision_model,
            caption_model,
        } => Ok(Arc::new(ollama::OllamaCaptioner::new(
            url,
            vision_model,
            caption_model,
        ))),

        #[cfg(not(feature = "ollama"))]
        CaptionerProvider::Ollama { .. } => Err(PixseekError::config(
            "Ollama captioner requires the 'ollama' feature",
        )),

        CaptionerProvider::External => Err(PixseekError::config(
            "External captioner: supply one through ImageSearcher::with_services",
        )),
    }
}
