//! ReceiveUpdatesUseCase: hands each received markup document to the application.
//!
//! The network layer delivers decoded text on an `mpsc` channel.  This use
//! case drains that channel and passes every message to an
//! [`UpdateHandler`], which in a real application swaps the running UI for
//! the new markup.  A handler that rejects one document does not stop the
//! stream; the next save will simply try again.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Error returned by an [`UpdateHandler`] that could not apply a document.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update rejected: {0}")]
    Rejected(String),
}

/// Something that can apply a received markup document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Applies `markup`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError`] when the document cannot be applied.
    async fn apply(&self, markup: String) -> Result<(), UpdateError>;
}

/// Counters for one run of the use case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub applied: usize,
    pub rejected: usize,
}

/// The Receive Updates use case.
pub struct ReceiveUpdatesUseCase<H> {
    handler: H,
}

impl<H: UpdateHandler> ReceiveUpdatesUseCase<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Applies messages until the channel closes.
    pub async fn run(&self, mut updates: mpsc::Receiver<String>) -> ReceiveSummary {
        let mut summary = ReceiveSummary::default();
        while let Some(markup) = updates.recv().await {
            let bytes = markup.len();
            match self.handler.apply(markup).await {
                Ok(()) => {
                    summary.applied += 1;
                    debug!(bytes, "update applied");
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!("{e}");
                }
            }
        }
        summary
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_run_applies_every_message_in_order() {
        // Arrange
        let mut handler = MockUpdateHandler::new();
        let mut seq = mockall::Sequence::new();
        for text in ["<A />", "<B />"] {
            handler
                .expect_apply()
                .with(eq(text.to_string()))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        let (tx, rx) = mpsc::channel(4);
        tx.send("<A />".to_string()).await.unwrap();
        tx.send("<B />".to_string()).await.unwrap();
        drop(tx);

        // Act
        let summary = ReceiveUpdatesUseCase::new(handler).run(rx).await;

        // Assert
        assert_eq!(summary, ReceiveSummary { applied: 2, rejected: 0 });
    }

    #[tokio::test]
    async fn test_rejected_update_does_not_stop_the_stream() {
        let mut handler = MockUpdateHandler::new();
        handler
            .expect_apply()
            .with(eq("broken".to_string()))
            .returning(|_| Err(UpdateError::Rejected("parse error".to_string())));
        handler
            .expect_apply()
            .with(eq("<Fixed />".to_string()))
            .returning(|_| Ok(()));
        let (tx, rx) = mpsc::channel(4);
        tx.send("broken".to_string()).await.unwrap();
        tx.send("<Fixed />".to_string()).await.unwrap();
        drop(tx);

        let summary = ReceiveUpdatesUseCase::new(handler).run(rx).await;

        assert_eq!(summary, ReceiveSummary { applied: 1, rejected: 1 });
    }

    #[test]
    fn test_closed_channel_returns_empty_summary() {
        let handler = MockUpdateHandler::new();
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);

        let summary = tokio_test::block_on(ReceiveUpdatesUseCase::new(handler).run(rx));

        assert_eq!(summary, ReceiveSummary::default());
    }
}
