//! Live observation of the watched directories.
//!
//! [`ChangeWatcher`] bridges file-system create events to
//! [`ImageSearcher::ingest`]. A `notify` watcher feeds a channel drained by a
//! single loop thread:
//!
//! ```text
//!            create event, image/* MIME
//!   Idle ───────────────────────────────▶ Debouncing
//!    ▲                                        │ settle delay elapsed
//!    │      Completed / Failed                ▼
//!    └──────────────────────────────────── Ingesting
//! ```
//!
//! A write to an image that is still settling restarts its delay. Other
//! modifications, removals, directories and non-image files are discarded.
//! A failed ingest is published on the searcher's event bus and
//! the loop carries on.

mod debounce;

pub use debounce::Debouncer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, instrument, warn};

use crate::caption::is_image_path;
use crate::document::builder::absolute_path;
use crate::error::{PixseekError, Result};
use crate::events::IndexEvent;
use crate::searcher::{ImageSearcher, IngestSource};

/// How long the loop sleeps when nothing is pending.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Where the watch loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WatcherState {
    /// Waiting for file-system events.
    Idle = 0,
    /// At least one new image is waiting out its settle delay.
    Debouncing = 1,
    /// An image is being captioned and indexed.
    Ingesting = 2,
    /// The loop has exited.
    Stopped = 3,
}

impl WatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Debouncing,
            2 => Self::Ingesting,
            _ => Self::Stopped,
        }
    }
}

/// Outcome of a watch session, returned by [`ChangeWatcher::stop`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatcherReport {
    /// Images ingested successfully.
    pub ingested: usize,

    /// Images whose ingest failed.
    pub failed: usize,

    /// Images still waiting out their settle delay when the watcher stopped.
    /// They were not ingested.
    pub dropped: Vec<PathBuf>,
}

/// Background watcher feeding new images into an [`ImageSearcher`].
///
/// Runs until [`stop`](Self::stop) is called or the handle is dropped.
pub struct ChangeWatcher {
    state: Arc<AtomicU8>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WatcherReport>>,
    watcher: Option<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("roots", &self.roots)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    /// Starts observing `searcher`'s watched directories.
    ///
    /// Directories that do not exist are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `Config` if no directories are configured, or none of them exist
    /// - `Watcher` if the platform watcher cannot be created or attached
    #[instrument(skip(searcher))]
    pub fn start(searcher: Arc<ImageSearcher>) -> Result<Self> {
        let configured = searcher.watched_directories();
        if configured.is_empty() {
            return Err(PixseekError::config(
                "no watched directories configured; refusing to start the watcher",
            ));
        }

        let (fs_tx, fs_rx) = crossbeam_channel::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = fs_tx.send(res);
            },
            notify::Config::default(),
        )?;

        let mut roots = Vec::new();
        for dir in configured {
            if !dir.path.is_dir() {
                warn!(path = %dir.path.display(), "Watched directory does not exist, skipping");
                continue;
            }
            let mode = if dir.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            // Absolute roots make event paths match the keys ingest stores
            let root = absolute_path(&dir.path);
            watcher.watch(&root, mode)?;
            roots.push(root);
        }

        if roots.is_empty() {
            return Err(PixseekError::config(format!(
                "none of the {} watched directories exist",
                configured.len()
            )));
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let state = Arc::new(AtomicU8::new(WatcherState::Idle as u8));
        let delay = searcher.config().debounce();

        let watch_loop = WatchLoop {
            searcher,
            fs_rx,
            stop_rx,
            state: Arc::clone(&state),
            debouncer: Debouncer::new(delay),
            report: WatcherReport::default(),
        };
        let handle = std::thread::Builder::new()
            .name("pixseek-watcher".into())
            .spawn(move || watch_loop.run())?;

        info!(roots = roots.len(), delay_ms = delay.as_millis() as u64, "Watcher started");

        Ok(Self {
            state,
            stop_tx,
            handle: Some(handle),
            watcher: Some(watcher),
            roots,
        })
    }

    /// Current position in the watch state machine.
    pub fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Directories actually being observed, as absolute paths.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stops the watcher.
    ///
    /// Pending debounces are cancelled and reported in
    /// [`WatcherReport::dropped`]; an ingest already running is allowed to
    /// finish first.
    #[instrument(skip(self))]
    pub fn stop(mut self) -> Result<WatcherReport> {
        let report = self.shutdown()?;
        info!(
            ingested = report.ingested,
            failed = report.failed,
            dropped = report.dropped.len(),
            "Watcher stopped"
        );
        Ok(report)
    }

    fn shutdown(&mut self) -> Result<WatcherReport> {
        let Some(handle) = self.handle.take() else {
            return Ok(WatcherReport::default());
        };

        let _ = self.stop_tx.try_send(());
        let report = handle
            .join()
            .map_err(|_| PixseekError::watcher("watch loop panicked"))?;

        // Detaches the platform watcher
        self.watcher.take();
        Ok(report)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Watcher did not shut down cleanly");
        }
    }
}

struct WatchLoop {
    searcher: Arc<ImageSearcher>,
    fs_rx: Receiver<notify::Result<Event>>,
    stop_rx: Receiver<()>,
    state: Arc<AtomicU8>,
    debouncer: Debouncer,
    report: WatcherReport,
}

impl WatchLoop {
    fn set_state(&self, state: WatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn settle_state(&self) {
        if self.debouncer.is_empty() {
            self.set_state(WatcherState::Idle);
        } else {
            self.set_state(WatcherState::Debouncing);
        }
    }

    fn run(mut self) -> WatcherReport {
        let fs_rx = self.fs_rx.clone();
        let stop_rx = self.stop_rx.clone();

        loop {
            let wait = self
                .debouncer
                .next_deadline()
                .map_or(IDLE_POLL, |deadline| {
                    deadline.saturating_duration_since(Instant::now())
                });

            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                recv(fs_rx) -> message => match message {
                    Ok(Ok(event)) => self.on_event(event),
                    Ok(Err(e)) => warn!(error = %e, "File system watcher error"),
                    Err(_) => break,
                },
                default(wait) => {}
            }

            if self.ingest_due() {
                break;
            }
            self.settle_state();
        }

        self.finish()
    }

    fn on_event(&mut self, event: Event) {
        let now = Instant::now();
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    if path.is_dir() || !is_image_path(&path) {
                        debug!(path = %path.display(), "Ignoring non-image create event");
                        continue;
                    }
                    debug!(path = %path.display(), "New image, debouncing");
                    self.debouncer.schedule(&path, now);
                }
            }
            EventKind::Modify(_) => {
                for path in event.paths {
                    if self.debouncer.touch(&path, now) {
                        debug!(path = %path.display(), "Image still being written, delay restarted");
                    }
                }
            }
            _ => return,
        }
        self.settle_state();
    }

    /// Ingests every image whose settle delay has elapsed. Returns true if a
    /// stop was requested in between.
    fn ingest_due(&mut self) -> bool {
        let due = self.debouncer.due(Instant::now());
        let mut remaining = due.into_iter();

        while let Some(path) = remaining.next() {
            if self.stop_rx.try_recv().is_ok() {
                // Not yet started; report with the cancelled debounces
                self.report.dropped.push(path);
                self.report.dropped.extend(remaining);
                return true;
            }

            self.set_state(WatcherState::Ingesting);
            self.searcher.events().publish(IndexEvent::Started { path: path.clone() });

            match self.searcher.ingest(&path, IngestSource::Background) {
                Ok(_) => self.report.ingested += 1,
                // Already published as Failed by the searcher
                Err(_) => self.report.failed += 1,
            }
        }
        false
    }

    fn finish(mut self) -> WatcherReport {
        self.report.dropped.extend(self.debouncer.drain());
        self.report.dropped.sort();
        for path in &self.report.dropped {
            warn!(path = %path.display(), "Watcher stopped before ingesting image");
        }
        self.set_state(WatcherState::Stopped);
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::Captioner;
    use crate::config::{Config, EmbeddingDimension, WatchedDirectory};
    use crate::embedding::HashEmbedding;
    use std::path::Path;
    use tempfile::tempdir;

    struct NoopCaptioner;

    impl Captioner for NoopCaptioner {
        fn describe(&self, _image: &Path) -> Result<String> {
            Ok("image".into())
        }

        fn caption(&self, _description: &str) -> Result<Vec<String>> {
            Ok((0..7).map(|i| format!("caption {i}")).collect())
        }
    }

    fn searcher(index_dir: &Path, watched: Vec<WatchedDirectory>) -> Arc<ImageSearcher> {
        let config = Config {
            index_path: index_dir.join("index.redb"),
            embedding_dimension: EmbeddingDimension::Custom(32),
            watched_directories: watched,
            debounce_ms: 20,
            ..Default::default()
        };
        Arc::new(
            ImageSearcher::with_services(
                config,
                Arc::new(NoopCaptioner),
                Arc::new(HashEmbedding::new(32)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_refuses_to_start_without_directories() {
        let dir = tempdir().unwrap();
        let err = ChangeWatcher::start(searcher(dir.path(), Vec::new())).unwrap_err();
        assert!(matches!(err, PixseekError::Config { .. }));
    }

    #[test]
    fn test_refuses_when_no_directory_exists() {
        let dir = tempdir().unwrap();
        let watched = vec![WatchedDirectory::new(dir.path().join("missing"))];
        let err = ChangeWatcher::start(searcher(dir.path(), watched)).unwrap_err();
        assert!(matches!(err, PixseekError::Config { .. }));
    }

    #[test]
    fn test_skips_missing_directories() {
        let dir = tempdir().unwrap();
        let photos = dir.path().join("photos");
        std::fs::create_dir(&photos).unwrap();
        let watched = vec![
            WatchedDirectory::new(dir.path().join("missing")),
            WatchedDirectory::new(&photos),
        ];

        let watcher = ChangeWatcher::start(searcher(dir.path(), watched)).unwrap();
        assert_eq!(watcher.roots(), &[photos]);
        assert_ne!(watcher.state(), WatcherState::Stopped);

        let report = watcher.stop().unwrap();
        assert_eq!(report, WatcherReport::default());
    }

    fn watch_loop(searcher: Arc<ImageSearcher>) -> WatchLoop {
        let (_fs_tx, fs_rx) = crossbeam_channel::unbounded();
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        WatchLoop {
            searcher,
            fs_rx,
            stop_rx,
            state: Arc::new(AtomicU8::new(WatcherState::Idle as u8)),
            debouncer: Debouncer::new(Duration::from_millis(500)),
            report: WatcherReport::default(),
        }
    }

    fn loop_state(watch_loop: &WatchLoop) -> WatcherState {
        WatcherState::from_u8(watch_loop.state.load(Ordering::Acquire))
    }

    #[test]
    fn test_write_to_settling_image_restarts_delay() {
        use notify::event::{CreateKind, DataChange, ModifyKind};

        let dir = tempdir().unwrap();
        let mut watch_loop = watch_loop(searcher(dir.path(), Vec::new()));
        let image = dir.path().join("growing.png");
        let other = dir.path().join("untracked.png");
        std::fs::write(&image, b"partial").unwrap();

        watch_loop
            .on_event(Event::new(EventKind::Create(CreateKind::File)).add_path(image.clone()));
        let first = watch_loop.debouncer.next_deadline().unwrap();
        assert_eq!(loop_state(&watch_loop), WatcherState::Debouncing);

        std::thread::sleep(Duration::from_millis(10));
        watch_loop.on_event(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(image.clone())
                .add_path(other),
        );

        assert_eq!(watch_loop.debouncer.len(), 1);
        assert!(watch_loop.debouncer.next_deadline().unwrap() > first);
    }

    #[test]
    fn test_write_to_unknown_file_schedules_nothing() {
        use notify::event::{DataChange, ModifyKind};

        let dir = tempdir().unwrap();
        let mut watch_loop = watch_loop(searcher(dir.path(), Vec::new()));
        watch_loop.on_event(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(dir.path().join("old.png")),
        );

        assert!(watch_loop.debouncer.is_empty());
        assert_eq!(loop_state(&watch_loop), WatcherState::Idle);
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            WatcherState::Idle,
            WatcherState::Debouncing,
            WatcherState::Ingesting,
            WatcherState::Stopped,
        ] {
            assert_eq!(WatcherState::from_u8(state as u8), state);
        }
    }
}
