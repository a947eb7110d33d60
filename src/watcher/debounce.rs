//! Settle-delay bookkeeping for newly created files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Tracks files waiting out their settle delay.
///
/// A file is scheduled when it appears and becomes due `delay` later. A new
/// event for a file that is already pending restarts its delay, so a file
/// that is still being written is opened only once the writer goes quiet.
///
/// Time is passed in explicitly; the debouncer never reads the clock.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    /// Creates a debouncer with the given settle delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Schedules `path` to become due `delay` after `now`.
    pub fn schedule(&mut self, path: &Path, now: Instant) {
        self.pending.insert(path.to_path_buf(), now + self.delay);
    }

    /// Restarts the delay of `path` if it is pending. Returns false, and
    /// schedules nothing, otherwise.
    pub fn touch(&mut self, path: &Path, now: Instant) -> bool {
        match self.pending.get_mut(path) {
            Some(deadline) => {
                *deadline = now + self.delay;
                true
            }
            None => false,
        }
    }

    /// Removes and returns every path due at `now`, oldest deadline first.
    pub fn due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<(PathBuf, Instant)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, deadline)| (path.clone(), *deadline))
            .collect();
        ready.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (path, _) in &ready {
            self.pending.remove(path);
        }
        ready.into_iter().map(|(path, _)| path).collect()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Cancels every pending path and returns them sorted.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        let mut dropped: Vec<PathBuf> = self.pending.drain().map(|(path, _)| path).collect();
        dropped.sort();
        dropped
    }

    /// Number of paths waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DELAY: Duration = Duration::from_millis(1000);

    #[test]
    fn test_not_due_before_delay() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        debouncer.schedule(Path::new("/a.png"), start);

        assert!(debouncer.due(start + Duration::from_millis(999)).is_empty());
        assert_eq!(debouncer.due(start + DELAY), vec![PathBuf::from("/a.png")]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_reschedule_restarts_delay() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        debouncer.schedule(Path::new("/a.png"), start);
        debouncer.schedule(Path::new("/a.png"), start + Duration::from_millis(600));

        assert_eq!(debouncer.len(), 1);
        assert!(debouncer.due(start + DELAY).is_empty());
        assert_eq!(
            debouncer.due(start + Duration::from_millis(1600)),
            vec![PathBuf::from("/a.png")]
        );
    }

    #[test]
    fn test_touch_only_restarts_pending_paths() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        debouncer.schedule(Path::new("/a.png"), start);

        assert!(debouncer.touch(Path::new("/a.png"), start + Duration::from_millis(900)));
        assert!(!debouncer.touch(Path::new("/b.png"), start));
        assert_eq!(debouncer.len(), 1);

        assert!(debouncer.due(start + DELAY).is_empty());
        assert_eq!(
            debouncer.due(start + Duration::from_millis(1900)),
            vec![PathBuf::from("/a.png")]
        );
    }

    #[test]
    fn test_due_in_deadline_order() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        debouncer.schedule(Path::new("/z.png"), start);
        debouncer.schedule(Path::new("/a.png"), start + Duration::from_millis(10));

        assert_eq!(
            debouncer.due(start + Duration::from_secs(5)),
            vec![PathBuf::from("/z.png"), PathBuf::from("/a.png")]
        );
    }

    #[test]
    fn test_next_deadline_and_drain() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DELAY);
        assert_eq!(debouncer.next_deadline(), None);

        debouncer.schedule(Path::new("/b.png"), start + Duration::from_millis(5));
        debouncer.schedule(Path::new("/a.png"), start);
        assert_eq!(debouncer.next_deadline(), Some(start + DELAY));

        assert_eq!(
            debouncer.drain(),
            vec![PathBuf::from("/a.png"), PathBuf::from("/b.png")]
        );
        assert!(debouncer.is_empty());
    }

    proptest! {
        #[test]
        fn prop_every_scheduled_path_fires_exactly_once(
            offsets in proptest::collection::vec((0u8..8, 0u64..3000), 1..40)
        ) {
            let start = Instant::now();
            let mut debouncer = Debouncer::new(DELAY);
            let mut scheduled = std::collections::BTreeSet::new();

            for (file, offset) in &offsets {
                let path = PathBuf::from(format!("/img{file}.png"));
                debouncer.schedule(&path, start + Duration::from_millis(*offset));
                scheduled.insert(path);
            }

            let mut fired = Vec::new();
            for step in 0..=8 {
                fired.extend(debouncer.due(start + Duration::from_millis(step * 500)));
            }

            let unique: std::collections::BTreeSet<_> = fired.iter().cloned().collect();
            prop_assert_eq!(unique.len(), fired.len());
            prop_assert_eq!(unique, scheduled);
            prop_assert!(debouncer.is_empty());
        }
    }
}
