//! Background worker pool for searcher requests.
//!
//! [`IndexWorker`] owns `worker_threads` threads consuming one
//! `crossbeam-channel` job queue. Each request returns a [`Pending`] handle
//! right away; the caller can block on it or `.await` it.
//!
//! ```text
//! caller ─ingest/search/remove─▶ [job queue] ─▶ worker thread(s) ─▶ ImageSearcher
//!    ▲                                                  │
//!    └────────────── Pending<T> ◀── Completer<T> ───────┘
//! ```
//!
//! With the default single thread, requests run strictly in submission
//! order. A job that is dropped without running (pool shut down, worker
//! panicked) resolves to [`PixseekError::WorkerStopped`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use atomic_waker::AtomicWaker;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use crate::document::IngestReport;
use crate::error::{PixseekError, Result};
use crate::searcher::{ImageSearcher, IngestSource};

struct Slot<T> {
    value: Mutex<Option<Result<T>>>,
    ready: Condvar,
    waker: AtomicWaker,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Result<T>>> {
        // The slot holds plain data; a panic elsewhere cannot leave it torn
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fill(&self, result: Result<T>) {
        *self.lock() = Some(result);
        self.ready.notify_all();
        self.waker.wake();
    }
}

/// Handle to the result of a queued request.
///
/// Block with [`wait`](Self::wait) or `.await` it; both yield the request's
/// `Result`.
pub struct Pending<T> {
    slot: Arc<Slot<T>>,
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Producer side of a [`Pending`]. Dropping it unfilled resolves the
/// pending handle to `WorkerStopped`.
struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

fn pending<T>() -> (Pending<T>, Completer<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
        ready: Condvar::new(),
        waker: AtomicWaker::new(),
    });
    (
        Pending {
            slot: Arc::clone(&slot),
        },
        Completer { slot: Some(slot) },
    )
}

impl<T> Completer<T> {
    fn complete(mut self, result: Result<T>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(PixseekError::WorkerStopped));
        }
    }
}

impl<T> Pending<T> {
    /// Returns true once the result is available.
    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Blocks until the request finishes.
    pub fn wait(self) -> Result<T> {
        let mut value = self.slot.lock();
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            value = self
                .slot
                .ready
                .wait(value)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Blocks for at most `timeout`.
    ///
    /// Gives the handle back as `Err(self)` if the request is still running.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut value = self.slot.lock();
            loop {
                if let Some(result) = value.take() {
                    return Ok(result);
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                value = self
                    .slot
                    .ready
                    .wait_timeout(value, remaining)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            }
        }
        Err(self)
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.slot.lock().take() {
            return Poll::Ready(result);
        }

        self.slot.waker.register(cx.waker());

        // Re-check after registering so a completion in between is not missed
        match self.slot.lock().take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

enum Job {
    Ingest {
        path: PathBuf,
        source: IngestSource,
        done: Completer<IngestReport>,
    },
    Search {
        query: String,
        done: Completer<Vec<PathBuf>>,
    },
    Remove {
        path: PathBuf,
        done: Completer<usize>,
    },
}

impl Job {
    fn run(self, searcher: &ImageSearcher) {
        match self {
            Self::Ingest { path, source, done } => done.complete(searcher.ingest(&path, source)),
            Self::Search { query, done } => done.complete(searcher.search(&query)),
            Self::Remove { path, done } => done.complete(searcher.remove(&path)),
        }
    }
}

/// Pool of threads running searcher requests off the caller's thread.
pub struct IndexWorker {
    searcher: Arc<ImageSearcher>,
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for IndexWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWorker")
            .field("threads", &self.handles.len())
            .field("queued", &self.sender.as_ref().map_or(0, |s| s.len()))
            .finish()
    }
}

impl IndexWorker {
    /// Starts `config.worker_threads` worker threads around `searcher`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a thread cannot be spawned.
    #[instrument(skip(searcher))]
    pub fn start(searcher: Arc<ImageSearcher>) -> Result<Self> {
        let threads = searcher.config().worker_threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let searcher = Arc::clone(&searcher);
            let handle = std::thread::Builder::new()
                .name(format!("pixseek-worker-{index}"))
                .spawn(move || work(&searcher, &receiver))?;
            handles.push(handle);
        }

        info!(threads, "Index worker started");
        Ok(Self {
            searcher,
            sender: Some(sender),
            handles,
        })
    }

    fn submit(&self, job: Job) {
        match &self.sender {
            // A failed send hands the job back; dropping it resolves its Pending
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!("Worker queue closed, request dropped");
                }
            }
            None => drop(job),
        }
    }

    /// Queues an ingest of `path`.
    pub fn ingest(&self, path: impl Into<PathBuf>, source: IngestSource) -> Pending<IngestReport> {
        let (pending, done) = pending();
        self.submit(Job::Ingest {
            path: path.into(),
            source,
            done,
        });
        pending
    }

    /// Queues a search for `query`.
    pub fn search(&self, query: impl Into<String>) -> Pending<Vec<PathBuf>> {
        let (pending, done) = pending();
        self.submit(Job::Search {
            query: query.into(),
            done,
        });
        pending
    }

    /// Queues removal of every document for `path`.
    pub fn remove(&self, path: impl Into<PathBuf>) -> Pending<usize> {
        let (pending, done) = pending();
        self.submit(Job::Remove {
            path: path.into(),
            done,
        });
        pending
    }

    /// Number of requests waiting for a free thread.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    /// Returns the searcher the pool runs requests against.
    pub fn searcher(&self) -> &Arc<ImageSearcher> {
        &self.searcher
    }

    /// Closes the queue, runs every request already queued and joins the
    /// threads.
    ///
    /// # Errors
    ///
    /// Returns `WorkerStopped` if a worker thread panicked.
    #[instrument(skip(self))]
    pub fn shutdown(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.sender.take();

        let mut panicked = 0usize;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        if panicked > 0 {
            warn!(panicked, "Worker threads panicked");
            return Err(PixseekError::WorkerStopped);
        }
        debug!("Index worker stopped");
        Ok(())
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!(error = %e, "Index worker did not shut down cleanly");
        }
    }
}

fn work(searcher: &ImageSearcher, receiver: &Receiver<Job>) {
    for job in receiver.iter() {
        job.run(searcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_completed_value() {
        let (pending, done) = pending::<usize>();
        assert!(!pending.is_ready());
        std::thread::spawn(move || done.complete(Ok(42)));
        assert_eq!(pending.wait().unwrap(), 42);
    }

    #[test]
    fn test_dropped_completer_resolves_to_worker_stopped() {
        let (pending, done) = pending::<usize>();
        drop(done);
        assert!(matches!(pending.wait(), Err(PixseekError::WorkerStopped)));
    }

    #[test]
    fn test_wait_timeout_hands_back_pending() {
        let (pending, done) = pending::<&'static str>();

        let pending = match pending.wait_timeout(Duration::from_millis(10)) {
            Err(pending) => pending,
            Ok(_) => panic!("nothing completed yet"),
        };

        done.complete(Ok("done"));
        assert_eq!(
            pending.wait_timeout(Duration::from_millis(10)).unwrap().unwrap(),
            "done"
        );
    }

    #[tokio::test]
    async fn test_pending_is_a_future() {
        let (pending, done) = pending::<Vec<u8>>();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            done.complete(Ok(vec![1, 2, 3]));
        });
        assert_eq!(pending.await.unwrap(), vec![1, 2, 3]);
    }
}
