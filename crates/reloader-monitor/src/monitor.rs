//! Monitor: wires the broadcast server and the file watcher together.
//!
//! This is the composition root used by the binary and by the end-to-end
//! tests.  Start order matters:
//!
//! 1. The server binds first, so a bad host or busy port fails before any
//!    watch is set up.
//! 2. The watcher starts with the server as its payload sink.  If that fails
//!    (missing directory, OS watch limit) the server is stopped again so
//!    nothing is left listening.
//!
//! Setup failures are both returned and raised as
//! [`ServerNotification::Error`] on the monitor's notification channel.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::application::publish_update::PayloadSink;
use crate::infrastructure::network::broadcast_server::{
    BroadcastServer, ServerConfig, ServerError, ServerNotification,
};
use crate::infrastructure::watcher::{FileWatcher, WatchError, WatcherConfig};

/// Error type for starting the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("broadcast server failed to start: {0}")]
    Server(#[from] ServerError),
    #[error("file watcher failed to start: {0}")]
    Watch(#[from] WatchError),
}

/// Runtime configuration for a [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub watcher: WatcherConfig,
}

/// A running (or stopped) monitor instance.
pub struct Monitor {
    server: Arc<BroadcastServer>,
    watcher: FileWatcher,
    notifier: mpsc::UnboundedSender<ServerNotification>,
}

impl Monitor {
    /// Creates a monitor and returns it together with the notification receiver.
    pub fn new(config: MonitorConfig) -> (Self, mpsc::UnboundedReceiver<ServerNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Arc::new(BroadcastServer::with_notifier(config.server, tx.clone()));
        let sink: Arc<dyn PayloadSink> = Arc::clone(&server) as Arc<dyn PayloadSink>;
        let watcher = FileWatcher::new(config.watcher, sink);
        (
            Self {
                server,
                watcher,
                notifier: tx,
            },
            rx,
        )
    }

    /// Starts the server and then the watcher.
    ///
    /// Returns the address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Server`] if the listener cannot be opened and
    /// [`MonitorError::Watch`] if the directory cannot be watched; in the
    /// latter case the server has already been stopped again.
    pub async fn start(&mut self) -> Result<SocketAddr, MonitorError> {
        let addr = self.server.start().await?;

        if let Err(e) = self.watcher.start() {
            error!("failed to start file watcher: {e}");
            let _ = self.notifier.send(ServerNotification::Error(e.to_string()));
            self.server.stop().await;
            return Err(e.into());
        }

        info!(
            %addr,
            root = %self.watcher.config().root.display(),
            "monitor started"
        );
        Ok(addr)
    }

    /// Stops the watcher and the server.  Idempotent; a stopped monitor
    /// cannot be started again.
    pub async fn stop(&mut self) {
        self.watcher.stop();
        self.server.stop().await;
    }

    /// The broadcast server, for direct broadcasts and client counts.
    pub fn server(&self) -> &Arc<BroadcastServer> {
        &self.server
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }
}
