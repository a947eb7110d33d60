//! Turns image paths into caption batches.
//!
//! ```text
//! file      ─describe─▶ caption ─validate─▶ 7 × (caption, {path})
//! directory ─for each immediate regular file, in name order─▶ same, plus progress
//! ```
//!
//! Every document records the absolute path of its image; relative inputs
//! are resolved against the current directory.
//!
//! Directory mode is all-or-nothing: the first failing file aborts the batch
//! with [`PixseekError::BatchAborted`] and nothing is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::types::CaptionBatch;
use crate::caption::{validate_captions, Captioner};
use crate::error::{PixseekError, Result};

/// Progress of a directory build, reported after each file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildProgress {
    /// File that was just captioned.
    pub file: PathBuf,

    /// Files completed so far (1-based).
    pub processed: usize,

    /// Files in the directory.
    pub total: usize,
}

impl BuildProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f32 / self.total as f32
        }
    }
}

/// Produces `(captions, metadata)` batches from images using a [`Captioner`].
#[derive(Clone)]
pub struct DocumentBuilder {
    captioner: Arc<dyn Captioner>,
}

impl std::fmt::Debug for DocumentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBuilder").finish_non_exhaustive()
    }
}

impl DocumentBuilder {
    /// Creates a builder around `captioner`.
    pub fn new(captioner: Arc<dyn Captioner>) -> Self {
        Self { captioner }
    }

    /// Builds the batch for `path`, dispatching on file or directory.
    ///
    /// `on_progress` is called once per file in directory mode and never in
    /// file mode.
    ///
    /// # Errors
    ///
    /// Returns `Analysis` if `path` does not exist. See [`Self::build_file`]
    /// and [`Self::build_directory`] for the rest.
    pub fn build(
        &self,
        path: &Path,
        on_progress: &mut dyn FnMut(&BuildProgress),
    ) -> Result<CaptionBatch> {
        if path.is_dir() {
            self.build_directory(path, on_progress)
        } else {
            self.build_file(path)
        }
    }

    /// Captions a single image, recording its absolute path.
    ///
    /// # Errors
    ///
    /// - `Analysis` if the file is missing or the description step fails
    /// - `StructuredOutput` if the captions cannot be parsed
    /// - `CaptionCount` unless exactly seven distinct captions come back
    #[instrument(skip(self), fields(file = %file.display()))]
    pub fn build_file(&self, file: &Path) -> Result<CaptionBatch> {
        let file = &absolute_path(file);
        if !file.is_file() {
            return Err(PixseekError::analysis(file, "file not found"));
        }

        let description = self.captioner.describe(file)?;
        let captions = self.captioner.caption(&description)?;
        let captions = validate_captions(file, captions)?;

        let mut batch = CaptionBatch::new();
        batch.push_image(file, captions);
        debug!(captions = batch.len(), "Image captioned");
        Ok(batch)
    }

    /// Captions every immediate regular file in `dir`.
    ///
    /// Sub-directories are not entered. Files are processed in file name
    /// order. An empty directory yields an empty batch.
    ///
    /// # Errors
    ///
    /// `Io` if the directory cannot be listed; `BatchAborted` wrapping the
    /// first per-file failure otherwise.
    #[instrument(skip(self, on_progress), fields(dir = %dir.display()))]
    pub fn build_directory(
        &self,
        dir: &Path,
        on_progress: &mut dyn FnMut(&BuildProgress),
    ) -> Result<CaptionBatch> {
        let files = list_files(dir)?;
        let total = files.len();
        let mut batch = CaptionBatch::new();

        for (index, file) in files.into_iter().enumerate() {
            let single = self
                .build_file(&file)
                .map_err(|source| PixseekError::BatchAborted {
                    file: file.clone(),
                    position: index + 1,
                    total,
                    source: Box::new(source),
                })?;

            batch.captions.extend(single.captions);
            batch.metadata.extend(single.metadata);

            on_progress(&BuildProgress {
                file,
                processed: index + 1,
                total,
            });
        }

        info!(files = total, captions = batch.len(), "Directory captioned");
        Ok(batch)
    }
}

/// Resolves `path` against the current directory without touching the file
/// system. Falls back to `path` itself if the current directory is unknown.
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lists the immediate regular files of `dir`, sorted by file name.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Follows symlinks, so a link to a regular file counts as one
        if fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::CAPTIONS_PER_IMAGE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Captions derived from the file name; fails on names containing "bad".
    struct NameCaptioner {
        calls: AtomicUsize,
    }

    impl Captioner for NameCaptioner {
        fn describe(&self, image: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = image.file_stem().unwrap().to_string_lossy().into_owned();
            if name.contains("bad") {
                return Err(PixseekError::analysis(image, "undecodable"));
            }
            Ok(name)
        }

        fn caption(&self, description: &str) -> Result<Vec<String>> {
            Ok((0..CAPTIONS_PER_IMAGE)
                .map(|i| format!("{description} caption {i}"))
                .collect())
        }
    }

    fn builder() -> (DocumentBuilder, Arc<NameCaptioner>) {
        let captioner = Arc::new(NameCaptioner {
            calls: AtomicUsize::new(0),
        });
        (DocumentBuilder::new(captioner.clone()), captioner)
    }

    #[test]
    fn test_build_file_yields_seven_documents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cat.png");
        fs::write(&file, b"png").unwrap();

        let (builder, _) = builder();
        let batch = builder.build_file(&file).unwrap();
        assert_eq!(batch.len(), CAPTIONS_PER_IMAGE);
        assert!(batch.metadata.iter().all(|m| m.refers_to(&file)));
    }

    #[test]
    fn test_absolute_path_resolves_against_current_dir() {
        let resolved = absolute_path(Path::new("photos/cat.png"));
        assert!(resolved.is_absolute());
        assert_eq!(
            resolved,
            std::env::current_dir().unwrap().join("photos").join("cat.png")
        );

        let already = Path::new("/library/cat.png");
        assert_eq!(absolute_path(already), already);
    }

    #[test]
    fn test_build_missing_file_is_analysis_error() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, captioner) = builder();
        let err = builder
            .build(&dir.path().join("gone.png"), &mut |_| {})
            .unwrap_err();
        assert!(err.is_analysis());
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_directory_progress_and_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            fs::write(dir.path().join(name), b"png").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("d.png"), b"png").unwrap();

        let (builder, _) = builder();
        let mut seen = Vec::new();
        let batch = builder
            .build(dir.path(), &mut |p| seen.push((p.processed, p.total, p.fraction())))
            .unwrap();

        assert_eq!(batch.len(), 3 * CAPTIONS_PER_IMAGE);
        assert_eq!(batch.image_count(), 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[2], (3, 3, 1.0));
        assert!(batch.metadata[0].refers_to(&dir.path().join("a.png")));
        assert!(batch.metadata[CAPTIONS_PER_IMAGE].refers_to(&dir.path().join("b.png")));
    }

    #[test]
    fn test_build_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, _) = builder();
        let mut calls = 0;
        let batch = builder.build(dir.path(), &mut |_| calls += 1).unwrap();
        assert!(batch.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_build_directory_aborts_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b_bad.png", "c.png"] {
            fs::write(dir.path().join(name), b"png").unwrap();
        }

        let (builder, captioner) = builder();
        let mut progress = 0;
        let err = builder
            .build(dir.path(), &mut |_| progress += 1)
            .unwrap_err();

        match &err {
            PixseekError::BatchAborted {
                file,
                position,
                total,
                ..
            } => {
                assert!(file.ends_with("b_bad.png"));
                assert_eq!(*position, 2);
                assert_eq!(*total, 3);
            }
            other => panic!("expected BatchAborted, got {other:?}"),
        }
        assert!(err.is_analysis());
        assert_eq!(progress, 1);
        // c.png is never attempted
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_build_progress_fraction_of_empty_total() {
        let progress = BuildProgress {
            file: PathBuf::new(),
            processed: 0,
            total: 0,
        };
        assert_eq!(progress.fraction(), 1.0);
    }
}
