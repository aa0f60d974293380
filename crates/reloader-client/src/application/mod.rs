//! Application layer use cases for the client.
//!
//! # What use cases does the client have?
//!
//! - **`receive_updates`** – Drains the channel of received markup and passes
//!   each document to an `UpdateHandler` supplied by the host application.
//!   The handler is injected at construction time so tests can replace it
//!   with a mock.

pub mod receive_updates;
