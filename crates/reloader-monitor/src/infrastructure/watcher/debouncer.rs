//! Change debouncing for the file watcher.
//!
//! Editors rarely save a file with a single filesystem event: a save can show
//! up as truncate + write + metadata change, or as write-to-temp + rename.
//! The debouncer collects the paths of a burst and releases them together
//! once the stream of events has been quiet for the debounce window.
//!
//! ```text
//! events:  a  a  b      a                         (quiet)
//! time:    |--|--|------|------------- window ----|
//! release:                                        [a, b]
//! ```
//!
//! Every recorded event pushes the deadline out again, so a steady stream of
//! events keeps the batch open.  Each path appears once per batch, in the
//! order it was first seen.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Collects changed paths and releases them as one batch after a quiet window.
///
/// Owned by the watcher's processing task, so it needs no locking.
#[derive(Debug)]
pub struct ChangeDebouncer {
    window: Duration,
    pending: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    deadline: Option<Instant>,
}

impl ChangeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            seen: HashSet::new(),
            deadline: None,
        }
    }

    /// Records a change to `path` and restarts the quiet window.
    pub fn record(&mut self, path: PathBuf) {
        if self.seen.insert(path.clone()) {
            self.pending.push(path);
        }
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Returns the pending batch if the window has elapsed, otherwise an
    /// empty vector.
    pub fn drain_ready(&mut self) -> Vec<PathBuf> {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                self.seen.clear();
                std::mem::take(&mut self.pending)
            }
            _ => Vec::new(),
        }
    }

    /// When the current batch becomes ready, for timer scheduling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ChangeDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
