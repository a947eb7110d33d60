//! Progress and notification events.
//!
//! The searcher and the watcher publish [`IndexEvent`]s on an [`EventBus`];
//! any number of front ends subscribe. Delivery is in-process over bounded
//! `crossbeam-channel` queues:
//!
//! ```text
//! ImageSearcher ─┐                    ┌─▶ EventSubscription (blocking recv)
//!                ├─▶ EventBus::publish┤
//! ChangeWatcher ─┘                    └─▶ EventSubscription (futures Stream)
//! ```
//!
//! Publishing never blocks. A subscriber whose queue is full misses the
//! event (logged at `warn`); a dropped subscription is pruned on the next
//! publish.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use atomic_waker::AtomicWaker;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use futures_core::Stream;
use tracing::warn;

/// An observable indexing event.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexEvent {
    /// The watcher picked up a new image and started ingesting it.
    Started {
        /// Image being ingested.
        path: PathBuf,
    },

    /// A directory ingest finished one more file.
    Progress {
        /// Directory being ingested.
        path: PathBuf,
        /// File that was just captioned.
        file: PathBuf,
        /// Files completed so far.
        processed: usize,
        /// Files in the directory.
        total: usize,
        /// `processed / total`, in `0.0..=1.0`.
        fraction: f32,
    },

    /// An ingest finished and its documents are persisted.
    Completed {
        /// File or directory that was ingested.
        path: PathBuf,
        /// Documents written to the index.
        documents_added: usize,
        /// Images those documents came from.
        files: usize,
    },

    /// An ingest failed; nothing from it was indexed.
    Failed {
        /// File or directory that was being ingested.
        path: PathBuf,
        /// Rendered error.
        error: String,
        /// Whether retrying may succeed.
        retryable: bool,
    },

    /// Documents for an image were removed, explicitly or because the file
    /// disappeared from disk.
    Removed {
        /// Image whose documents were removed.
        path: PathBuf,
        /// Number of documents removed.
        documents_removed: usize,
    },
}

impl IndexEvent {
    /// Returns the path the event is about.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Started { path }
            | Self::Progress { path, .. }
            | Self::Completed { path, .. }
            | Self::Failed { path, .. }
            | Self::Removed { path, .. } => path,
        }
    }
}

struct Subscriber {
    sender: Sender<IndexEvent>,
    waker: Arc<AtomicWaker>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let subscribers = match self.subscribers.get_mut() {
            Ok(subscribers) => std::mem::take(subscribers),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        // Disconnect first so a woken stream observes the end
        for Subscriber { sender, waker } in subscribers {
            drop(sender);
            waker.wake();
        }
    }
}

/// Fan-out publisher for [`IndexEvent`]s.
///
/// Cloning is cheap; clones share the subscriber list. When every clone is
/// dropped, subscriptions observe the end of the stream.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus whose subscribers each buffer up to `capacity` events.
    ///
    /// A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscription only sees events published after this call.
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = crossbeam_channel::bounded(self.capacity);
        let waker = Arc::new(AtomicWaker::new());

        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(Subscriber {
                sender,
                waker: Arc::clone(&waker),
            });
        }

        EventSubscription { receiver, waker }
    }

    /// Delivers `event` to every live subscriber without blocking.
    pub fn publish(&self, event: IndexEvent) {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            warn!("Event bus lock poisoned, dropping event");
            return;
        };

        subscribers.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => {
                subscriber.waker.wake();
                true
            }
            Err(TrySendError::Full(dropped)) => {
                warn!(path = %dropped.path().display(), "Subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscribers (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().map_or(0, |s| s.len())
    }
}

/// Receiving end of an [`EventBus`] subscription.
///
/// Offers blocking receives and implements [`Stream`] for async consumers.
/// The stream ends once every [`EventBus`] clone has been dropped.
pub struct EventSubscription {
    receiver: Receiver<IndexEvent>,
    waker: Arc<AtomicWaker>,
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl EventSubscription {
    /// Blocks until the next event; `None` once the bus is gone.
    pub fn recv(&self) -> Option<IndexEvent> {
        self.receiver.recv().ok()
    }

    /// Blocks for at most `timeout`; `None` on timeout or once the bus is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<IndexEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns the next buffered event without blocking.
    pub fn try_recv(&self) -> Option<IndexEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drains every buffered event without blocking.
    pub fn drain(&self) -> Vec<IndexEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Stream for EventSubscription {
    type Item = IndexEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.try_recv() {
            Ok(event) => return Poll::Ready(Some(event)),
            Err(TryRecvError::Disconnected) => return Poll::Ready(None),
            Err(TryRecvError::Empty) => {}
        }

        self.waker.register(cx.waker());

        // Re-check after registering so a publish in between is not missed
        match self.receiver.try_recv() {
            Ok(event) => Poll::Ready(Some(event)),
            Err(TryRecvError::Disconnected) => Poll::Ready(None),
            Err(TryRecvError::Empty) => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn completed(path: &str) -> IndexEvent {
        IndexEvent::Completed {
            path: PathBuf::from(path),
            documents_added: 7,
            files: 1,
        }
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let bus = EventBus::new(8);
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(completed("/a.png"));

        assert_eq!(a.try_recv(), Some(completed("/a.png")));
        assert_eq!(b.try_recv(), Some(completed("/a.png")));
    }

    #[test]
    fn test_full_subscriber_drops_without_blocking() {
        let bus = EventBus::new(1);
        let sub = bus.subscribe();

        bus.publish(completed("/1.png"));
        bus.publish(completed("/2.png"));

        assert_eq!(sub.drain(), vec![completed("/1.png")]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(completed("/a.png"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_recv_returns_none_after_bus_dropped() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        bus.publish(completed("/a.png"));
        drop(bus);

        assert_eq!(sub.recv(), Some(completed("/a.png")));
        assert_eq!(sub.recv(), None);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(sub.recv_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_event_path_accessor() {
        let event = IndexEvent::Failed {
            path: PathBuf::from("/x.png"),
            error: "boom".into(),
            retryable: true,
        };
        assert_eq!(event.path(), std::path::Path::new("/x.png"));
    }

    #[tokio::test]
    async fn test_stream_yields_events_across_threads() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();

        let publisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            bus.publish(completed("/late.png"));
            // bus dropped here, ending the stream
        });

        assert_eq!(sub.next().await, Some(completed("/late.png")));
        assert_eq!(sub.next().await, None);
        publisher.join().unwrap();
    }
}
