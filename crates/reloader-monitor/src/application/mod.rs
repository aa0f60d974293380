//! Application layer use cases for the monitor.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! rules and the infrastructure (OS/network/storage).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** a user goal (e.g., "when a markup file changes, push its
//!   text to every running app").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`publish_update`** – Decides whether a changed file's text is sent and
//!   hands it to a [`publish_update::PayloadSink`] (the broadcast server).

pub mod publish_update;
