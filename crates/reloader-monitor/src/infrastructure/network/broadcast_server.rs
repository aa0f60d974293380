//! BroadcastServer: accepts client connections and fans framed payloads out
//! to all of them.
//!
//! # Tasks
//!
//! ```text
//! start()
//!  ├─ accept loop        -- registers each socket, spawns its peer watch
//!  ├─ keep-alive task    -- broadcasts "PING" every keepalive_interval
//!  └─ peer watch (1/conn) -- reads and discards inbound bytes until EOF
//! ```
//!
//! All of them, plus application calls to [`BroadcastServer::broadcast`],
//! meet only at the [`ConnectionRegistry`] and at each connection's writer
//! mutex.  Broadcasts additionally take a server-wide send lock, so every
//! connection sees frames in the order `broadcast` was called.
//!
//! # Failure handling
//!
//! A write error, a write that exceeds `write_timeout`, or EOF seen by the
//! peer watch removes the connection from the registry.  Whichever path wins
//! the removal closes the writer and raises
//! [`ServerNotification::ClientDisconnected`]; the others do nothing.
//! `broadcast` itself never fails.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reloader_core::{encode_frame, ShutdownSignal, KEEPALIVE_MESSAGE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connection_registry::{Connection, ConnectionId, ConnectionInfo, ConnectionRegistry};
use crate::application::publish_update::PayloadSink;

/// Default TCP port the monitor listens on.
pub const DEFAULT_PORT: u16 = 5500;
/// Default cadence of keep-alive broadcasts.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on a single connection write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const PEER_READ_BUFFER: usize = 1024;

/// Error type for broadcast server setup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server has been stopped and cannot be restarted")]
    Disposed,
    #[error("server is already running")]
    AlreadyStarted,
    #[error("invalid server config: {0}")]
    InvalidConfig(String),
    #[error("invalid bind host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Configuration for the broadcast server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address or host name to bind.
    pub host: String,
    /// TCP port; `0` lets the OS choose.
    pub port: u16,
    pub keepalive_interval: Duration,
    pub write_timeout: Duration,
}

impl ServerConfig {
    /// Checks the values the background tasks cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] for a zero keep-alive interval
    /// or a zero write timeout.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.keepalive_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::InvalidConfig(
                "write timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Events emitted by the server to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotification {
    ClientConnected(ConnectionInfo),
    ClientDisconnected(ConnectionInfo),
    Error(String),
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was fully written to.
    pub delivered: usize,
    /// Connections removed because their write failed or timed out.
    pub dropped: usize,
}

/// State shared by the server handle and its background tasks.
struct Shared {
    config: ServerConfig,
    registry: ConnectionRegistry,
    notifier: mpsc::UnboundedSender<ServerNotification>,
    shutdown: ShutdownSignal,
    disposed: AtomicBool,
    send_lock: tokio::sync::Mutex<()>,
}

/// The broadcast server.
pub struct BroadcastServer {
    shared: Arc<Shared>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BroadcastServer {
    /// Creates a server and returns it together with the notification receiver.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_notifier(config, tx), rx)
    }

    /// Creates a server that reports on an existing notification channel.
    pub fn with_notifier(
        config: ServerConfig,
        notifier: mpsc::UnboundedSender<ServerNotification>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                registry: ConnectionRegistry::new(),
                notifier,
                shutdown: ShutdownSignal::new(),
                disposed: AtomicBool::new(false),
                send_lock: tokio::sync::Mutex::new(()),
            }),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Binds the listener and starts the accept loop and keep-alive task.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the port is `0`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Disposed`] after [`stop`](Self::stop).
    /// - [`ServerError::AlreadyStarted`] on a second call.
    /// - [`ServerError::InvalidConfig`] when [`ServerConfig::validate`] fails.
    /// - [`ServerError::InvalidHost`] / [`ServerError::Bind`] when the
    ///   listener cannot be opened.  An `Error` notification is raised too,
    ///   and nothing is left running.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.is_disposed() {
            return Err(ServerError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let bound = match self.shared.config.validate() {
            Ok(()) => self.bind().await,
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                error!("failed to start broadcast server: {e}");
                self.shared.notify(ServerNotification::Error(e.to_string()));
                return Err(e);
            }
        };

        *lock(&self.local_addr) = Some(local_addr);

        let accept = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
        let keepalive = tokio::spawn(keepalive_loop(Arc::clone(&self.shared)));
        lock(&self.tasks).extend([accept, keepalive]);

        info!("broadcast server listening on {local_addr}");
        Ok(local_addr)
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let config = &self.shared.config;
        let addr = resolve_bind_addr(&config.host, config.port).await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok((listener, local_addr))
    }

    /// Sends `payload` as one frame to every connected client.
    ///
    /// Does nothing after [`stop`](Self::stop) or for an empty payload.
    /// Targets whose write fails or times out are removed.
    pub async fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        self.shared.broadcast(payload).await
    }

    /// Stops accepting, cancels background tasks and closes every connection.
    ///
    /// Idempotent, and safe to call on a server that was never started.  The
    /// server cannot be started again afterwards.
    pub async fn stop(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.cancel();

        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let connections = self.shared.registry.drain();
        let count = connections.len();
        for conn in connections {
            conn.abort_watch();
            self.shared.retire(&conn).await;
        }

        info!(closed = count, "broadcast server stopped");
    }

    /// Number of registered connections.
    pub fn connected_clients(&self) -> usize {
        self.shared.registry.len()
    }

    /// The bound address once [`start`](Self::start) has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.shutdown.cancel();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        for conn in self.shared.registry.drain() {
            conn.abort_watch();
        }
    }
}

#[async_trait]
impl PayloadSink for BroadcastServer {
    async fn deliver(&self, payload: &[u8]) -> usize {
        self.broadcast(payload).await.delivered
    }

    fn connected_clients(&self) -> usize {
        BroadcastServer::connected_clients(self)
    }
}

// ── Shared state operations ───────────────────────────────────────────────────

impl Shared {
    fn notify(&self, notification: ServerNotification) {
        // The owner may have dropped the receiver; the server keeps working.
        let _ = self.notifier.send(notification);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        if self.is_disposed() {
            return BroadcastReport::default();
        }

        let frame = match encode_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("broadcast skipped: {e}");
                return BroadcastReport::default();
            }
        };

        let _ordered = self.send_lock.lock().await;
        let targets = self.registry.snapshot();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let write_timeout = self.config.write_timeout;
        let writes = targets.iter().map(|conn| {
            let frame = frame.as_slice();
            async move {
                let result = match time::timeout(write_timeout, conn.write_frame(frame)).await {
                    Ok(written) => written,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write did not complete within {write_timeout:?}"),
                    )),
                };
                (conn, result)
            }
        });

        let mut report = BroadcastReport::default();
        for (conn, result) in join_all(writes).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client = %conn.info(), "write failed: {e}");
                    if let Some(conn) = self.registry.remove(conn.id()) {
                        conn.abort_watch();
                        self.retire(&conn).await;
                    }
                    report.dropped += 1;
                }
            }
        }

        debug!(
            bytes = payload.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast complete"
        );
        report
    }

    /// Closes a connection that has already been taken out of the registry
    /// and reports it.  Only the caller that won the removal gets here.
    async fn retire(&self, conn: &Connection) {
        if time::timeout(self.config.write_timeout, conn.shutdown_writer())
            .await
            .is_err()
        {
            debug!(client = %conn.info(), "writer still busy at close");
        }
        info!(client = %conn.info(), "client disconnected");
        self.notify(ServerNotification::ClientDisconnected(conn.info()));
    }

    async fn register(self: &Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote, "could not disable Nagle: {e}");
        }

        let (reader, writer) = stream.into_split();
        let conn = Arc::new(Connection::new(remote, Box::new(writer)));
        self.registry.insert(Arc::clone(&conn));

        // Checked after the insert: a `stop` that drained the registry before
        // it would otherwise leave this connection behind.
        if self.is_disposed() {
            if let Some(conn) = self.registry.remove(conn.id()) {
                let _ = time::timeout(self.config.write_timeout, conn.shutdown_writer()).await;
            }
            debug!(%remote, "connection refused after stop");
            return;
        }

        let watch = tokio::spawn(watch_peer(Arc::clone(self), conn.id(), reader));
        conn.set_watch_task(watch.abort_handle());

        info!(client = %conn.info(), "client connected");
        self.notify(ServerNotification::ClientConnected(conn.info()));
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => shared.register(stream, remote).await,
                Err(e) => warn!("accept failed: {e}"),
            },
        }
    }
    debug!("accept loop exited");
}

async fn keepalive_loop(shared: Arc<Shared>) {
    let period = shared.config.keepalive_interval;
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let report = shared.broadcast(KEEPALIVE_MESSAGE.as_bytes()).await;
                if report.dropped > 0 {
                    debug!(dropped = report.dropped, "keep-alive found dead connections");
                }
            }
        }
    }
}

/// Reads and discards inbound bytes until the peer closes or errors.
async fn watch_peer<R>(shared: Arc<Shared>, id: ConnectionId, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PEER_READ_BUFFER];
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!(%id, "peer closed the connection");
                    break;
                }
                Ok(n) => debug!(%id, bytes = n, "discarded inbound bytes"),
                Err(e) => {
                    debug!(%id, "peer read failed: {e}");
                    break;
                }
            },
        }
    }
    // This task is the one ending, so there is no watch to abort here.
    if let Some(conn) = shared.registry.remove(id) {
        shared.retire(&conn).await;
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ServerError::InvalidHost {
            host: host.to_string(),
            reason: "host is empty".to_string(),
        });
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ServerError::InvalidHost {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    resolved.next().ok_or_else(|| ServerError::InvalidHost {
        host: host.to_string(),
        reason: "name resolved to no addresses".to_string(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
