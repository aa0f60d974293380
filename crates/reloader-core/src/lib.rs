//! # reloader-core
//!
//! Shared library for Reloader containing the wire framing codec, the
//! keep-alive sentinel, retry policies, and the shutdown signal used by both
//! the monitor (server) and the client.
//!
//! # Architecture overview (for beginners)
//!
//! Reloader pushes file updates from a development machine to running
//! applications on the same private network.  The *monitor* watches a folder,
//! and whenever a markup file changes it broadcasts the file's contents to
//! every connected *client*.  The client hands the text to the application,
//! which swaps the UI in place without restarting.
//!
//! This crate (`reloader-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Each message is a
//!   4-byte little-endian length followed by that many body bytes.  The
//!   literal body `PING` is reserved as a keep-alive probe.
//!
//! - **`retry`** – Retry policies as plain values ("retry forever every 5 s",
//!   "retry three times at 100/200/300 ms") plus an async executor that runs
//!   an operation under a policy.
//!
//! - **`shutdown`** – A cloneable cancellation signal that long-running loops
//!   check at well-defined points and can await alongside other work.

pub mod protocol;
pub mod retry;
pub mod shutdown;

// Re-export the most-used items at the crate root so callers can write
// `reloader_core::encode_frame` instead of `reloader_core::protocol::codec::encode_frame`.
pub use protocol::codec::{decode_frame, decode_header, encode_frame, FramingError};
pub use protocol::keepalive::{is_keepalive, KEEPALIVE_MESSAGE};
pub use retry::{retry_async, RetryError, RetryPolicy};
pub use shutdown::ShutdownSignal;
