//! Document generation.
//!
//! A **document** is one embedded caption with metadata pointing back at its
//! source image. The [`DocumentBuilder`] turns an image, or every file in a
//! directory, into a [`CaptionBatch`] ready for
//! [`VectorStore::add`](crate::index::VectorStore::add).

pub mod builder;
pub mod types;

pub use builder::{BuildProgress, DocumentBuilder};
pub use types::{CaptionBatch, Document, DocumentMetadata, IngestReport, ScoredDocument};

use crate::error::{PixseekError, ValidationError};
use crate::storage::schema::MAX_CAPTION_SIZE;

/// Validates a [`CaptionBatch`] before it reaches storage.
///
/// # Rules
///
/// - `captions` and `metadata` have the same length
/// - every caption is non-blank and at most 16 KB
pub(crate) fn validate_batch(batch: &CaptionBatch) -> Result<(), PixseekError> {
    if batch.captions.len() != batch.metadata.len() {
        return Err(ValidationError::length_mismatch(
            "captions",
            batch.captions.len(),
            "metadata",
            batch.metadata.len(),
        )
        .into());
    }

    for caption in &batch.captions {
        if caption.trim().is_empty() {
            return Err(ValidationError::required_field("caption").into());
        }
        if caption.len() > MAX_CAPTION_SIZE {
            return Err(ValidationError::invalid_field(
                "caption",
                format!("{} bytes exceeds the {MAX_CAPTION_SIZE} byte limit", caption.len()),
            )
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_ok() {
        let mut batch = CaptionBatch::new();
        batch.push_image(std::path::Path::new("/a.png"), vec!["one".into(), "two".into()]);
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn test_validate_batch_length_mismatch() {
        let batch = CaptionBatch {
            captions: vec!["one".into(), "two".into()],
            metadata: vec![DocumentMetadata::for_path("/a.png")],
        };
        let err = validate_batch(&batch).unwrap_err();
        assert!(matches!(
            err,
            PixseekError::Validation(ValidationError::LengthMismatch {
                left_len: 2,
                right_len: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_validate_batch_blank_caption() {
        let batch = CaptionBatch {
            captions: vec!["   ".into()],
            metadata: vec![DocumentMetadata::for_path("/a.png")],
        };
        assert!(validate_batch(&batch).unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_batch_oversized_caption() {
        let batch = CaptionBatch {
            captions: vec!["x".repeat(MAX_CAPTION_SIZE + 1)],
            metadata: vec![DocumentMetadata::default()],
        };
        assert!(validate_batch(&batch).unwrap_err().is_validation());
    }
}
