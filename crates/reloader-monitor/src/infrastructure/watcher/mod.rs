//! File change watcher.
//!
//! Watches one directory tree and, whenever a matching file settles after a
//! burst of edits, reads it and publishes its text through the
//! [`PublishUpdateUseCase`].
//!
//! # Pipeline
//!
//! ```text
//! notify thread ──(Event)──▶ mpsc ──▶ processing task
//!                                       ├─ filter: kind + extension
//!                                       ├─ ChangeDebouncer (quiet window)
//!                                       └─ per released path:
//!                                            read (bounded retry) ─▶ publish
//! ```
//!
//! The notify callback runs on a thread owned by the `notify` crate, so it
//! hands events to the async side with `blocking_send`.  A single task owns
//! the debouncer and processes one batch at a time.
//!
//! # Locked files
//!
//! Some editors keep the file open for a moment after the change
//! notification fires.  Reads are retried per [`RetryPolicy::file_read`]
//! (100, 200, 300 ms).  When every attempt fails the path is skipped for this
//! batch with a warning; the watcher keeps running.
//!
//! Only the read is retried.  The bytes are then decoded once (see [`text`]);
//! a file that does not decode is skipped straight away, since waiting will
//! not change its encoding.

pub mod debouncer;
pub mod text;

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reloader_core::{retry_async, RetryError, RetryPolicy, ShutdownSignal};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::publish_update::{PayloadSink, PublishUpdateUseCase};
use debouncer::{ChangeDebouncer, DEFAULT_DEBOUNCE};
use text::{decode_text, DecodeError};

/// Capacity of the channel between the notify thread and the processing task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Error type for watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch path {} is not an existing directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Error type for reading a changed file.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] RetryError<io::Error>),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Configuration for the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Directory watched recursively.
    pub root: PathBuf,
    /// File extensions (without the dot) that trigger an update.  Matched
    /// case-insensitively.
    pub extensions: Vec<String>,
    pub debounce: Duration,
    pub read_policy: RetryPolicy,
}

impl WatcherConfig {
    /// Config for `root` with the default extension, window and read policy.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["xaml".to_string()],
            debounce: DEFAULT_DEBOUNCE,
            read_policy: RetryPolicy::file_read(),
        }
    }

    /// Returns `true` if `path` has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(OsStr::to_str) else {
            return false;
        };
        self.extensions
            .iter()
            .map(|e| e.trim_start_matches('.'))
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Returns `true` for event kinds that may change file content.
fn is_content_event(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Watches a directory and publishes changed files.
pub struct FileWatcher {
    config: WatcherConfig,
    publisher: Arc<PublishUpdateUseCase>,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    shutdown: ShutdownSignal,
}

impl FileWatcher {
    pub fn new(config: WatcherConfig, sink: Arc<dyn PayloadSink>) -> Self {
        Self {
            config,
            publisher: Arc::new(PublishUpdateUseCase::new(sink)),
            watcher: None,
            task: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Starts watching.  Must be called from within a Tokio runtime.
    ///
    /// Calling `start` on a running watcher does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NotADirectory`] when the root is missing or is a
    /// file, and [`WatchError::Notify`] when the OS watch cannot be set up.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.is_running() {
            debug!("file watcher already running");
            return Ok(());
        }
        if !self.config.root.is_dir() {
            return Err(WatchError::NotADirectory(self.config.root.clone()));
        }

        let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                // The callback is sync and runs on notify's own thread.
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!("file watch error: {e}"),
            }
        })?;
        watcher.watch(&self.config.root, RecursiveMode::Recursive)?;

        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(process_events(
            self.config.clone(),
            Arc::clone(&self.publisher),
            rx,
            shutdown.clone(),
        ));

        self.watcher = Some(watcher);
        self.task = Some(task);
        self.shutdown = shutdown;

        info!(
            root = %self.config.root.display(),
            extensions = ?self.config.extensions,
            "watching for changes"
        );
        Ok(())
    }

    /// Stops watching.  Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        // Dropping the OS watcher closes the event channel.
        let was_running = self.watcher.take().is_some();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if was_running {
            info!(root = %self.config.root.display(), "file watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Processing task ───────────────────────────────────────────────────────────

async fn process_events(
    config: WatcherConfig,
    publisher: Arc<PublishUpdateUseCase>,
    mut rx: mpsc::Receiver<Event>,
    shutdown: ShutdownSignal,
) {
    let mut debouncer = ChangeDebouncer::new(config.debounce);

    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => record_event(&event, &config, &mut debouncer),
                None => break,
            },
            _ = wait_until(deadline) => {
                let batch = debouncer.drain_ready();
                if !batch.is_empty() {
                    publish_batch(batch, &config, &publisher, &shutdown).await;
                }
            }
        }
    }
    debug!("file watcher task exited");
}

fn record_event(event: &Event, config: &WatcherConfig, debouncer: &mut ChangeDebouncer) {
    if !is_content_event(&event.kind) {
        return;
    }
    for path in &event.paths {
        if config.matches(path) {
            debug!(path = %path.display(), kind = ?event.kind, "recorded change");
            debouncer.record(path.clone());
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn publish_batch(
    batch: Vec<PathBuf>,
    config: &WatcherConfig,
    publisher: &PublishUpdateUseCase,
    shutdown: &ShutdownSignal,
) {
    debug!(count = batch.len(), "processing debounced changes");
    for path in batch {
        if shutdown.is_cancelled() {
            return;
        }
        // Rename sources and deleted files show up in the batch too.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                debug!(path = %path.display(), "not a file any more; skipped");
                continue;
            }
        }

        match read_with_retry(&path, &config.read_policy, shutdown).await {
            Ok(content) => {
                publisher.publish(&path, &content).await;
            }
            Err(ReadError::Io(RetryError::Cancelled { .. })) => return,
            Err(e) => warn!(path = %path.display(), "could not read changed file: {e}"),
        }
    }
}

/// Reads a file as text, retrying the read per `policy` while it is locked.
///
/// # Errors
///
/// - [`ReadError::Io`] with the last I/O error once the policy gives up, or
///   with [`RetryError::Cancelled`] on shutdown.
/// - [`ReadError::Decode`] when the bytes are not valid text.  Not retried.
pub async fn read_with_retry(
    path: &Path,
    policy: &RetryPolicy,
    shutdown: &ShutdownSignal,
) -> Result<String, ReadError> {
    let bytes = retry_async(policy, Some(shutdown), |attempt| async move {
        if attempt > 1 {
            debug!(path = %path.display(), attempt, "retrying file read");
        }
        tokio::fs::read(path).await
    })
    .await?;
    Ok(decode_text(&bytes)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
