//! Infrastructure layer for the monitor.
//!
//! Contains OS-facing adapters: the TCP broadcast server, the filesystem
//! watcher, and config file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `reloader_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
pub mod watcher;
