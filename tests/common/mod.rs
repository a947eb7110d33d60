//! Shared fixtures for the integration tests.
//!
//! The fake captioner derives captions from the file stem, so a query made of
//! the stem's words finds the image through the hashed embedder.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pixseek::{
    Captioner, Config, EmbeddingDimension, EventSubscription, HashEmbedding, ImageSearcher,
    IndexEvent, PixseekError, Result, WatchedDirectory,
};

pub const DIMENSION: usize = 256;

const VARIANTS: [&str; 7] = [
    "photo", "picture", "image", "snapshot", "scene", "view", "shot",
];

/// Deterministic stand-in for the vision and caption models.
///
/// - stems starting with `broken` fail to describe (`Analysis`)
/// - stems starting with `few` yield five captions (`CaptionCount`)
#[derive(Default)]
pub struct FakeCaptioner {
    pub described: AtomicUsize,
}

impl FakeCaptioner {
    pub fn described(&self) -> usize {
        self.described.load(Ordering::SeqCst)
    }
}

impl Captioner for FakeCaptioner {
    fn describe(&self, image: &Path) -> Result<String> {
        self.described.fetch_add(1, Ordering::SeqCst);

        if !image.is_file() {
            return Err(PixseekError::analysis(image, "file not found"));
        }
        let stem = image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if stem.starts_with("broken") {
            return Err(PixseekError::analysis(image, "cannot decode image"));
        }
        Ok(stem.replace('_', " "))
    }

    fn caption(&self, description: &str) -> Result<Vec<String>> {
        let count = if description.starts_with("few") { 5 } else { 7 };
        Ok(VARIANTS
            .iter()
            .take(count)
            .map(|variant| format!("{description} {variant}"))
            .collect())
    }
}

/// Layout of one test: images live in `photos/`, the index beside it.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub captioner: Arc<FakeCaptioner>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("photos")).unwrap();
        Self {
            dir,
            captioner: Arc::new(FakeCaptioner::default()),
        }
    }

    pub fn photos(&self) -> PathBuf {
        self.dir.path().join("photos")
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.path().join("images.redb")
    }

    pub fn config(&self) -> Config {
        Config {
            index_path: self.index_path(),
            embedding_dimension: EmbeddingDimension::Custom(DIMENSION),
            watched_directories: vec![WatchedDirectory::new(self.photos())],
            debounce_ms: 50,
            ..Default::default()
        }
    }

    pub fn searcher(&self) -> ImageSearcher {
        self.searcher_with(self.config())
    }

    pub fn searcher_with(&self, config: Config) -> ImageSearcher {
        let dimension = config.dimension();
        ImageSearcher::with_services(
            config,
            self.captioner.clone(),
            Arc::new(HashEmbedding::new(dimension)),
        )
        .unwrap()
    }

    /// Writes a placeholder image file under `photos/`.
    pub fn image(&self, name: &str) -> PathBuf {
        let path = self.photos().join(name);
        fs::write(&path, b"\x89PNG placeholder").unwrap();
        path
    }
}

/// Waits up to `timeout` for an event matching `pred`, returning it.
pub fn wait_for(
    events: &EventSubscription,
    timeout: Duration,
    mut pred: impl FnMut(&IndexEvent) -> bool,
) -> Option<IndexEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Some(event) if pred(&event) => return Some(event),
            Some(_) => continue,
            None => return None,
        }
    }
}
