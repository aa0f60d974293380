//! Registry of live client connections.
//!
//! The registry is the only place the broadcast server looks up who to send
//! to.  It is shared between the accept loop (the sole inserter), each
//! connection's peer-watch task, the keep-alive task and application
//! broadcast calls.
//!
//! # Removal happens exactly once
//!
//! A connection can fail on several paths at the same time: a broadcast write
//! times out while the peer-watch task sees EOF, or `stop` drains the map
//! while a broadcast is in flight.  [`ConnectionRegistry::remove`] hands the
//! `Arc<Connection>` to exactly one caller; everyone else gets `None`.  Only
//! the winner closes the writer and reports the disconnect.
//!
//! The map sits behind a `std::sync::Mutex`.  Every method takes the lock,
//! copies what it needs out, and releases it before returning, so the lock is
//! never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Unique identifier for a server-side connection.
pub type ConnectionId = Uuid;

/// Write half of a client connection, boxed so tests can substitute in-memory pipes.
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of a connection as reported in server notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote: SocketAddr,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}:{}", self.id, self.remote.ip(), self.remote.port())
    }
}

/// One accepted client connection.
pub struct Connection {
    info: ConnectionInfo,
    /// `None` once the connection has been closed; nothing is written after that.
    writer: tokio::sync::Mutex<Option<FrameWriter>>,
    watch_task: Mutex<Option<AbortHandle>>,
}

impl Connection {
    /// Creates a connection with a fresh random id.
    pub fn new(remote: SocketAddr, writer: FrameWriter) -> Self {
        Self {
            info: ConnectionInfo {
                id: Uuid::new_v4(),
                remote,
            },
            writer: tokio::sync::Mutex::new(Some(writer)),
            watch_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.info.remote
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    /// Writes one already-encoded frame and flushes it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, or [`io::ErrorKind::NotConnected`]
    /// when the connection has already been closed.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    /// Closes the write half.  Later writes fail with `NotConnected`.
    pub async fn shutdown_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // The peer may already be gone; there is nothing to do about a failed FIN.
            let _ = writer.shutdown().await;
        }
    }

    pub(crate) fn set_watch_task(&self, handle: AbortHandle) {
        *lock(&self.watch_task) = Some(handle);
    }

    /// Aborts the task that watches the peer for EOF, if one is attached.
    pub(crate) fn abort_watch(&self) {
        if let Some(handle) = lock(&self.watch_task).take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Thread-safe map of live connections keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection.  A connection with the same id is replaced.
    pub fn insert(&self, connection: Arc<Connection>) {
        lock(&self.connections).insert(connection.id(), connection);
    }

    /// Removes a connection, returning it only to the first caller.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        lock(&self.connections).remove(&id)
    }

    /// Returns the current members.  Later inserts and removals do not affect
    /// the returned vector.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).values().cloned().collect()
    }

    /// Removes and returns every member.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).drain().map(|(_, conn)| conn).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        lock(&self.connections).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.connections).is_empty()
    }
}

/// Locks a std mutex, recovering the data if a panicking holder poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    fn make_connection(port: u16) -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(1024);
        (Arc::new(Connection::new(addr(port), Box::new(ours))), theirs)
    }

    #[test]
    fn test_connection_info_display_is_id_dash_ip_colon_port() {
        let id = Uuid::nil();
        let info = ConnectionInfo {
            id,
            remote: addr(5500),
        };
        assert_eq!(
            info.to_string(),
            "00000000-0000-0000-0000-000000000000 - 192.168.1.20:5500"
        );
    }

    #[test]
    fn test_new_connections_get_distinct_ids() {
        let (a, _pa) = make_connection(1);
        let (b, _pb) = make_connection(2);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_insert_then_snapshot_contains_connection() {
        // Arrange
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = make_connection(1);

        // Act
        registry.insert(Arc::clone(&conn));

        // Assert
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), conn.id());
        assert!(registry.contains(conn.id()));
    }

    #[test]
    fn test_remove_returns_connection_exactly_once() {
        let registry = ConnectionRegistry::new();
        let (conn, _peer) = make_connection(1);
        registry.insert(Arc::clone(&conn));

        assert!(registry.remove(conn.id()).is_some());
        assert!(registry.remove(conn.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_removal() {
        let registry = ConnectionRegistry::new();
        let (a, _pa) = make_connection(1);
        let (b, _pb) = make_connection(2);
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));

        let snapshot = registry.snapshot();
        registry.remove(a.id());

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        for port in 1..=3 {
            registry.insert(make_connection(port).0);
        }

        let drained = registry.drain();

        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_removal_has_single_winner() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _peer) = make_connection(1);
        registry.insert(Arc::clone(&conn));

        let winners: usize = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = conn.id();
                std::thread::spawn(move || registry.remove(id).is_some())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_write_frame_reaches_peer() {
        // Arrange
        let (conn, mut peer) = make_connection(1);

        // Act
        conn.write_frame(b"\x02\x00\x00\x00hi").await.unwrap();

        // Assert
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x02\x00\x00\x00hi");
    }

    #[tokio::test]
    async fn test_write_after_shutdown_is_not_connected() {
        let (conn, mut peer) = make_connection(1);

        conn.shutdown_writer().await;
        let err = conn.write_frame(b"x").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let mut buf = Vec::new();
        assert_eq!(peer.read_to_end(&mut buf).await.unwrap(), 0, "peer sees EOF");
    }

    #[tokio::test]
    async fn test_shutdown_writer_twice_is_harmless() {
        let (conn, _peer) = make_connection(1);
        conn.shutdown_writer().await;
        conn.shutdown_writer().await;
    }
}
