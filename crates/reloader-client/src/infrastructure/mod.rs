//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `reloader_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – TCP client that connects to the monitor, reads framed
//!   messages, drops keep-alives and reconnects when the connection is lost.

pub mod network;
