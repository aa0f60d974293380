//! Network infrastructure for the monitor.
//!
//! # Sub-modules
//!
//! - **`connection_registry`** – The set of live client connections, with
//!   exactly-once removal so a dead client is reported only once.
//!
//! - **`broadcast_server`** – TCP listener, accept loop, keep-alive timer and
//!   the fan-out that writes one framed payload to every connection.
//!
//! - **`local_address`** – Picks the machine's private IPv4 address as the
//!   default bind host.

pub mod broadcast_server;
pub mod connection_registry;
pub mod local_address;
