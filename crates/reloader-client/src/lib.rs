//! reloader-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does reloader-client do? (for beginners)
//!
//! The client runs inside the application being developed.  It keeps one TCP
//! connection open to the monitor on the developer's machine and, every time
//! the monitor pushes a saved markup file, hands that text to the
//! application so it can rebuild its UI without restarting.
//!
//! Networks come and go (laptops sleep, phones background apps), so the
//! client:
//!
//! 1. Retries the connection until the monitor is reachable.
//! 2. Notices when the monitor goes away and reconnects.
//! 3. Drops the monitor's `PING` keep-alives so the application only ever
//!    sees real documents.
//! 4. On constrained platforms, reopens the connection periodically even
//!    when it looks healthy.

/// Application layer: use cases for the client.
pub mod application;

/// Infrastructure layer: network I/O.
pub mod infrastructure;

pub use infrastructure::network::{
    ClientConfig, ClientError, ConnectOutcome, ConnectionState, Endpoint, ResilientClient,
};
