//! Keep-alive sentinel shared by the monitor and the client.
//!
//! The monitor broadcasts the literal text `PING` on a fixed cadence using
//! the normal frame format.  Clients recognise and discard it; it never
//! reaches the embedding application.

/// Reserved body text used only as a liveness probe.
pub const KEEPALIVE_MESSAGE: &str = "PING";

/// Returns `true` when a decoded frame body is the keep-alive sentinel.
pub fn is_keepalive(body: &[u8]) -> bool {
    body == KEEPALIVE_MESSAGE.as_bytes()
}
