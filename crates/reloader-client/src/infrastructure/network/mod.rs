//! Network infrastructure for the client application.
//!
//! Keeps one TCP connection to the monitor alive across network drops and
//! turns the framed byte stream into text messages for the application.
//!
//! Architecture:
//! - `ResilientClient` owns the TCP stream and a `Disconnected → Connecting
//!   → Connected` state machine.
//! - A poll task (see [`ResilientClient::start_polling`]) wakes every
//!   `poll_interval`, reconnects when needed, and reads at most one message
//!   per tick when bytes are waiting.  Decoded messages go out on an `mpsc`
//!   channel.
//! - [`ResilientClient::read_message`] is the pull-style alternative for
//!   callers that want to block on the socket themselves.
//! - The keep-alive message `PING` is consumed here and never forwarded.
//!
//! # Forced resync on constrained platforms
//!
//! Some mobile platforms silently freeze sockets of backgrounded apps; the
//! stream looks healthy but never delivers again.  With `resync_every =
//! Some(n)` the poll task drops and reopens the connection every `n` ticks
//! regardless of its apparent state.

pub mod endpoint;

use std::io;
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reloader_core::{
    decode_header, is_keepalive, retry_async, FramingError, RetryError, RetryPolicy,
    ShutdownSignal,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    sync::{mpsc, Mutex},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub use endpoint::{Endpoint, EndpointError, DEFAULT_PORT};

/// Default time between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Ticks between forced reconnects on constrained platforms.
pub const CONSTRAINED_RESYNC_TICKS: u64 = 60;
/// Default bound on reading a frame once it has started arriving.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest frame body the client accepts.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// Shortest poll interval the client runs with.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the monitor failed.
    #[error("failed to connect to monitor at {endpoint}: {source}")]
    ConnectFailed {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
    /// The frame header was invalid or announced an oversized body.
    #[error("protocol error: {0}")]
    Protocol(#[from] FramingError),
    /// The frame body was not UTF-8 text.
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    /// A frame did not arrive completely within the read timeout.
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),
    /// The connection was closed by the remote side.
    #[error("connection closed by monitor")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("client has been disposed")]
    Disposed,
    /// Polling reconnects on its own, which needs auto-reconnect enabled.
    #[error("polling requires auto-reconnect to be enabled")]
    AutoReconnectDisabled,
    #[error("polling has already been started")]
    AlreadyPolling,
}

/// Configuration for the client's network connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Address of the monitor.
    pub endpoint: Endpoint,
    /// Reconnect on failure.  When disabled a single connect attempt is made.
    pub auto_reconnect: bool,
    pub poll_interval: Duration,
    /// Force a reconnect every this many poll ticks.
    pub resync_every: Option<u64>,
    /// Retry policy for connect attempts when auto-reconnect is enabled.
    pub connect_policy: RetryPolicy,
    pub read_timeout: Duration,
    pub max_frame_len: usize,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            auto_reconnect: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            resync_every: None,
            connect_policy: RetryPolicy::connect_forever(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Enables the periodic forced reconnect used on constrained platforms.
    pub fn constrained(mut self) -> Self {
        self.resync_every = Some(CONSTRAINED_RESYNC_TICKS);
        self
    }
}

/// Connection state of a [`ResilientClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Result of a [`ResilientClient::connect`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was opened.
    Connected,
    /// The client was already connected; nothing was done.
    AlreadyConnected,
    /// Another connect is running; nothing was done.
    InProgress,
    /// The client was cancelled before a connection was made.
    Cancelled,
    /// The retry policy gave up.
    Failed,
}

/// Clears the in-flight connect flag however the connect future ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why the current stream is being dropped.
#[derive(Debug, Clone, Copy)]
enum DropReason {
    Failed,
    Resync,
}

/// Maintains the TCP connection from the client to the monitor.
pub struct ResilientClient {
    config: ClientConfig,
    state: AtomicU8,
    connecting: AtomicBool,
    polling: AtomicBool,
    connect_attempts: AtomicU64,
    stream: Mutex<Option<TcpStream>>,
    shutdown: ShutdownSignal,
}

impl ResilientClient {
    /// Creates a new (not yet connected) client.
    ///
    /// A poll interval below [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn new(mut config: ClientConfig) -> Arc<Self> {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested = ?config.poll_interval,
                "poll interval too short; using {MIN_POLL_INTERVAL:?}"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Arc::new(Self {
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            connecting: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            stream: Mutex::new(None),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Total TCP connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if prev != next {
            debug!(from = ?prev, to = ?next, "connection state changed");
        }
    }

    // ── Connecting ────────────────────────────────────────────────────────────

    /// Makes the initial connection.
    ///
    /// With auto-reconnect this keeps retrying per the connect policy until
    /// it succeeds or the client is cancelled; without it exactly one
    /// attempt is made.
    pub async fn start(&self) -> ConnectOutcome {
        info!(
            endpoint = %self.config.endpoint,
            auto_reconnect = self.config.auto_reconnect,
            "starting client"
        );
        self.connect().await
    }

    /// Opens a connection unless one is open, being opened, or the client is
    /// cancelled.
    pub async fn connect(&self) -> ConnectOutcome {
        if self.shutdown.is_cancelled() {
            return ConnectOutcome::Cancelled;
        }
        if self.is_connected() {
            return ConnectOutcome::AlreadyConnected;
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ConnectOutcome::InProgress;
        }
        let _guard = ConnectingGuard(&self.connecting);
        // Another connect may have finished between the first check and the
        // exchange above.
        if self.is_connected() {
            return ConnectOutcome::AlreadyConnected;
        }
        self.set_state(ConnectionState::Connecting);

        let policy = if self.config.auto_reconnect {
            self.config.connect_policy.clone()
        } else {
            RetryPolicy::none()
        };

        let result = retry_async(&policy, Some(&self.shutdown), |attempt| self.open_stream(attempt)).await;

        match result {
            Ok(stream) => {
                let mut slot = self.stream.lock().await;
                if self.shutdown.is_cancelled() {
                    drop(stream);
                    self.set_state(ConnectionState::Disconnected);
                    return ConnectOutcome::Cancelled;
                }
                *slot = Some(stream);
                self.set_state(ConnectionState::Connected);
                info!(endpoint = %self.config.endpoint, "connected to monitor");
                ConnectOutcome::Connected
            }
            Err(RetryError::Cancelled { attempts }) => {
                self.set_state(ConnectionState::Disconnected);
                debug!(attempts, "connect cancelled");
                ConnectOutcome::Cancelled
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(attempts, "could not connect: {last}");
                ConnectOutcome::Failed
            }
        }
    }

    async fn open_stream(&self, attempt: u32) -> Result<TcpStream, ClientError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let endpoint = &self.config.endpoint;
        debug!(%endpoint, attempt, "connecting");

        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|source| ClientError::ConnectFailed {
                endpoint: endpoint.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {e}");
        }
        Ok(stream)
    }

    async fn drop_stream(&self, reason: DropReason) {
        let had_stream = self.stream.lock().await.take().is_some();
        self.set_state(ConnectionState::Disconnected);
        if had_stream {
            match reason {
                DropReason::Failed => info!("disconnected from monitor"),
                DropReason::Resync => debug!("dropped connection for periodic resync"),
            }
        }
    }

    // ── Push surface ──────────────────────────────────────────────────────────

    /// Starts the poll task and returns the channel of received messages.
    ///
    /// The channel closes when the client is cancelled or disposed.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AutoReconnectDisabled`] when auto-reconnect is off.
    /// - [`ClientError::Disposed`] after cancellation.
    /// - [`ClientError::AlreadyPolling`] if a poll task is running.
    pub fn start_polling(self: Arc<Self>) -> Result<mpsc::Receiver<String>, ClientError> {
        if !self.config.auto_reconnect {
            return Err(ClientError::AutoReconnectDisabled);
        }
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Disposed);
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyPolling);
        }

        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        tokio::spawn(async move { self.poll_loop(tx).await });
        Ok(rx)
    }

    async fn poll_loop(self: Arc<Self>, tx: mpsc::Sender<String>) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.shutdown.is_cancelled() || tx.is_closed() {
                break;
            }
            ticks = ticks.wrapping_add(1);
            if !self.poll_tick(ticks, &tx).await {
                break;
            }
        }

        if self.shutdown.is_cancelled() {
            // `dispose` may have found the stream locked by this task.
            self.stream.lock().await.take();
        }
        self.polling.store(false, Ordering::SeqCst);
        debug!(ticks, "poll loop exited");
    }

    /// Runs one tick.  Returns `false` when the loop should stop.
    async fn poll_tick(&self, tick: u64, tx: &mpsc::Sender<String>) -> bool {
        let resync_due = self
            .config
            .resync_every
            .is_some_and(|every| every > 0 && tick % every == 0);
        if resync_due && self.is_connected() {
            self.drop_stream(DropReason::Resync).await;
        }

        if !self.is_connected() {
            match self.connect().await {
                ConnectOutcome::Connected | ConnectOutcome::AlreadyConnected => {}
                ConnectOutcome::Cancelled => return false,
                ConnectOutcome::InProgress | ConnectOutcome::Failed => return true,
            }
        }

        match self.poll_once().await {
            Ok(Some(message)) => tx.send(message).await.is_ok(),
            Ok(None) => true,
            Err(e) => {
                warn!("read failed: {e}");
                self.drop_stream(DropReason::Failed).await;
                true
            }
        }
    }

    /// Reads one frame if bytes are already waiting; never blocks on an idle socket.
    ///
    /// Returns `Ok(None)` when nothing was waiting or the frame was a keep-alive.
    async fn poll_once(&self) -> Result<Option<String>, ClientError> {
        let mut slot = self.stream.lock().await;
        let stream = slot.as_mut().ok_or(ClientError::NotConnected)?;

        let mut probe = [0u8; 1];
        match time::timeout(Duration::ZERO, stream.peek(&mut probe)).await {
            Err(_) => return Ok(None),
            Ok(Ok(0)) => return Err(ClientError::Closed),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
        }

        let read_timeout = self.config.read_timeout;
        let len = time::timeout(read_timeout, read_header(stream, self.config.max_frame_len))
            .await
            .map_err(|_| ClientError::ReadTimeout(read_timeout))??;
        let message = read_body(stream, len, read_timeout).await?;

        if self.shutdown.is_cancelled() {
            slot.take();
        }
        Ok(filter_keepalive(message))
    }

    // ── Pull surface ──────────────────────────────────────────────────────────

    /// Waits for the next non-keep-alive message.
    ///
    /// Connects first if needed.  On a read failure the connection is
    /// dropped and, with auto-reconnect enabled, reopened once before giving
    /// up.  Returns `None` when no message could be read or the client was
    /// cancelled.
    pub async fn read_message(&self) -> Option<String> {
        let rounds = if self.config.auto_reconnect { 2 } else { 1 };

        for _ in 0..rounds {
            if self.shutdown.is_cancelled() {
                return None;
            }
            if !self.is_connected() {
                match self.connect().await {
                    ConnectOutcome::Connected | ConnectOutcome::AlreadyConnected => {}
                    _ => return None,
                }
            }
            match self.read_next_message().await {
                Ok(message) => return Some(message),
                Err(ClientError::Disposed) => return None,
                Err(e) => {
                    warn!("read failed: {e}");
                    self.drop_stream(DropReason::Failed).await;
                }
            }
        }
        None
    }

    async fn read_next_message(&self) -> Result<String, ClientError> {
        let mut slot = self.stream.lock().await;
        let stream = slot.as_mut().ok_or(ClientError::NotConnected)?;

        loop {
            let len = read_header(stream, self.config.max_frame_len).await?;
            let message = read_body(stream, len, self.config.read_timeout).await?;
            if self.shutdown.is_cancelled() {
                slot.take();
                return Err(ClientError::Disposed);
            }
            if let Some(message) = filter_keepalive(message) {
                return Ok(message);
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Raises the shutdown signal.  The poll task and any retry loop stop at
    /// their next check point; a read already in progress finishes first.
    pub fn cancel(&self) {
        if self.shutdown.cancel() {
            debug!("client cancelled");
        }
    }

    /// Cancels the client, drops the stream and marks it disconnected.
    /// Idempotent.
    pub fn dispose(&self) {
        if !self.shutdown.cancel() {
            return;
        }
        // A reader holding the lock drops the stream itself once it sees the
        // signal.
        if let Ok(mut slot) = self.stream.try_lock() {
            slot.take();
        }
        self.set_state(ConnectionState::Disconnected);
        info!("client disposed");
    }
}

// ── Frame reading ─────────────────────────────────────────────────────────────

/// Reads a frame header and checks the announced length.
async fn read_header<R>(reader: &mut R, max_frame_len: usize) -> Result<usize, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; reloader_core::protocol::HEADER_SIZE];
    read_exact_or_closed(reader, &mut header).await?;
    let len = decode_header(header)?;
    if len > max_frame_len {
        return Err(FramingError::FrameTooLarge {
            declared: len,
            limit: max_frame_len,
        }
        .into());
    }
    Ok(len)
}

/// Reads a `len`-byte body as UTF-8 text within `read_timeout`.
async fn read_body<R>(reader: &mut R, len: usize, read_timeout: Duration) -> Result<String, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut body = vec![0u8; len];
    time::timeout(read_timeout, read_exact_or_closed(reader, &mut body))
        .await
        .map_err(|_| ClientError::ReadTimeout(read_timeout))??;
    Ok(String::from_utf8(body)?)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ClientError::Closed),
        Err(e) => Err(e.into()),
    }
}

fn filter_keepalive(message: String) -> Option<String> {
    if is_keepalive(message.as_bytes()) {
        debug!("keep-alive received");
        None
    } else {
        Some(message)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
