//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the optional `reloader.toml` configuration file.
//! - Writing a config back to disk (used to generate a starter file).
//! - Providing sensible defaults when the file does not exist.
//! - Turning the file schema into the runtime server and watcher configs.

pub mod config;
