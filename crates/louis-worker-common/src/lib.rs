//! Common types, errors, and configuration for louis-worker.
//!
//! This crate provides shared functionality used across the louis-worker workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, execution limits, and tables
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig, TableConfig, TableSourceConfig};
pub use config_file::{ConfigFile, WorkerConfigFile};
pub use error::{
    ConfigError, EngineError, MarshalError, ProtocolError, TableError, WorkerError,
};
