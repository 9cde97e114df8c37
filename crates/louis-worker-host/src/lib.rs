//! Host services for the liblouis engine.
//!
//! This crate provides what the engine needs from the host besides raw
//! memory access:
//!
//! - [`linker`]: WASI preview 1 linker and the engine log callback
//! - [`logging`]: Routing engine log messages into `tracing`
//! - [`source`]: Where table bytes come from
//! - [`vfs`]: The per-worker directory the engine reads tables from
//! - [`tables`]: Installing tables and tracking the inventory
//!
//! # Isolation
//!
//! The engine can only see its private directory, preopened as `/`.
//! Table names are plain file names; anything that could escape the
//! directory is rejected before a fetch is attempted.

pub mod linker;
pub mod logging;
pub mod source;
pub mod tables;
pub mod vfs;

pub use linker::{create_linker, log_callback};
pub use logging::LoggingHost;
pub use source::{
    DirectoryTableSource, HttpTableSource, MemoryTableSource, TableSource, source_from_config,
};
pub use tables::{TableRecord, TableStore, validate_name};
pub use vfs::PrivateFs;
