//! PublishUpdateUseCase: turns a changed file's text into a broadcast.
//!
//! The file watcher reads a changed file and hands its text to this use case,
//! which decides whether it is worth sending and passes it to a
//! [`PayloadSink`].  The sink is the broadcast server in production and a
//! mock in unit tests.
//!
//! Rules applied, in order:
//!
//! 1. Empty content is dropped.  Editors often truncate a file before writing
//!    the new contents, and an empty markup document is never a useful reload.
//! 2. When no client is connected there is nobody to reload, so the payload
//!    is not encoded or sent at all.
//! 3. Otherwise the UTF-8 bytes are delivered to every connected client.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

/// Destination for update payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Sends `payload` to every connected client and returns how many
    /// connections accepted it.
    async fn deliver(&self, payload: &[u8]) -> usize;

    /// Number of clients currently connected.
    fn connected_clients(&self) -> usize;
}

/// What happened to a single file update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The payload was handed to the sink and reached this many clients.
    Delivered(usize),
    /// The file was empty.
    SkippedEmpty,
    /// No client was connected.
    SkippedNoClients,
}

/// The Publish Update use case.
pub struct PublishUpdateUseCase {
    sink: Arc<dyn PayloadSink>,
}

impl PublishUpdateUseCase {
    pub fn new(sink: Arc<dyn PayloadSink>) -> Self {
        Self { sink }
    }

    /// Publishes the text of the file at `path`.
    pub async fn publish(&self, path: &Path, content: &str) -> PublishOutcome {
        if content.is_empty() {
            debug!(path = %path.display(), "file is empty; nothing to publish");
            return PublishOutcome::SkippedEmpty;
        }

        if self.sink.connected_clients() == 0 {
            debug!(path = %path.display(), "no clients connected; update not sent");
            return PublishOutcome::SkippedNoClients;
        }

        let delivered = self.sink.deliver(content.as_bytes()).await;
        info!(
            path = %path.display(),
            bytes = content.len(),
            delivered,
            "published update"
        );
        PublishOutcome::Delivered(delivered)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
