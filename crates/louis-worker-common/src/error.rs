//! Error types for louis-worker.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`EngineError`]: Loading and calling the translation engine
//! - [`TableError`]: Fetching and installing translation tables
//! - [`MarshalError`]: Moving text in and out of guest memory
//! - [`ProtocolError`]: Request handling and worker readiness
//! - [`WorkerError`]: Umbrella error for everything above

use std::io;

use thiserror::Error;

/// Errors raised while loading or calling the translation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine module failed to compile, instantiate, or initialize.
    ///
    /// This is fatal for the worker that attempted the load.
    #[error("Engine load failed: {reason}")]
    LoadFailed {
        /// Description of the load failure.
        reason: String,
    },

    /// A required export is missing from the engine module.
    #[error("Engine module is missing required export '{name}'")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// The engine reported a wide-character size other than 2 or 4 bytes.
    #[error("Unsupported wide character size: {size} bytes")]
    UnsupportedCharSize {
        /// The size reported by `lou_charSize`.
        size: i32,
    },

    /// The engine trapped during a foreign call.
    #[error("Engine trap in '{function}': {message}")]
    Trap {
        /// The export that was being called.
        function: String,
        /// Description of the trap.
        message: String,
    },

    /// A foreign call exhausted its fuel budget.
    #[error("Fuel exhausted in '{function}': CPU limit exceeded")]
    FuelExhausted {
        /// The export that was being called.
        function: String,
    },
}

/// Errors raised by the table store.
#[derive(Error, Debug)]
pub enum TableError {
    /// The table bytes could not be obtained from the table source.
    #[error("Failed to fetch table '{name}': {reason}")]
    FetchFailed {
        /// Table name.
        name: String,
        /// Description of the fetch failure.
        reason: String,
    },

    /// The engine's private filesystem rejected the write.
    #[error("Failed to write table '{name}': {source}")]
    WriteFailed {
        /// Table name.
        name: String,
        #[source]
        source: io::Error,
    },

    /// The table name cannot be used as a file name.
    #[error("Invalid table name: '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A request referenced a table that is not installed.
    #[error("Table not installed: '{name}'")]
    NotInstalled {
        /// Table name.
        name: String,
    },
}

/// Errors raised while marshalling a translation through guest memory.
#[derive(Error, Debug)]
pub enum MarshalError {
    /// Input or output did not fit the sized buffers.
    ///
    /// Truncated output is always reported through this variant.
    #[error("Encoding overflow: {reason}")]
    EncodingOverflow {
        /// Description of what overflowed.
        reason: String,
    },

    /// The guest allocator returned a null pointer.
    #[error("Guest allocation of {bytes} bytes failed")]
    AllocationFailed {
        /// Requested allocation size.
        bytes: usize,
    },

    /// A guest memory access fell outside linear memory.
    #[error("Guest memory access out of bounds: {address:#x}+{len}")]
    OutOfBounds {
        /// Start address of the access.
        address: u32,
        /// Length of the access in bytes.
        len: usize,
    },

    /// The request text or table list cannot be passed to the engine.
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Description of the problem.
        reason: String,
    },

    /// The engine produced output that cannot be decoded.
    #[error("Invalid engine output: {reason}")]
    InvalidOutput {
        /// Description of the problem.
        reason: String,
    },

    /// The engine reported failure without producing output.
    #[error("Translation failed for table list '{tables}'")]
    TranslationFailed {
        /// The table list passed to the engine.
        tables: String,
    },

    /// The foreign call itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors raised by the request protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A request arrived before the worker reached `Ready`.
    #[error("NotReady: worker is {state}")]
    NotReady {
        /// The state the worker was in.
        state: String,
    },

    /// Initialization failed earlier; the worker is unusable.
    #[error("Initialization failed: {reason}")]
    InitFailed {
        /// The original failure.
        reason: String,
    },

    /// The worker task is gone and can no longer answer.
    #[error("Worker is no longer running")]
    WorkerGone,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is outside its permitted range.
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// Description of the problem.
        reason: String,
    },

    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Top-level worker errors.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Create a new `LoadFailed` error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Returns `true` if the error happened while loading the module.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. } | Self::MissingExport { .. } | Self::UnsupportedCharSize { .. }
        )
    }
}

impl TableError {
    /// Create a new `FetchFailed` error.
    pub fn fetch_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidName` error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Name of the table this error concerns.
    pub fn table_name(&self) -> &str {
        match self {
            Self::FetchFailed { name, .. }
            | Self::WriteFailed { name, .. }
            | Self::InvalidName { name }
            | Self::NotInstalled { name } => name,
        }
    }
}

impl MarshalError {
    /// Create a new `EncodingOverflow` error.
    pub fn overflow(reason: impl Into<String>) -> Self {
        Self::EncodingOverflow {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidOutput` error.
    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            reason: reason.into(),
        }
    }
}

impl ConfigError {
    /// Create a new `Invalid` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TableError::fetch_failed("missing.ctb", "not found");
        assert_eq!(
            err.to_string(),
            "Failed to fetch table 'missing.ctb': not found"
        );

        let err = ProtocolError::NotReady {
            state: "Initializing".into(),
        };
        assert_eq!(err.to_string(), "NotReady: worker is Initializing");
    }

    #[test]
    fn test_marshal_error_from_engine() {
        let engine_err = EngineError::FuelExhausted {
            function: "lou_translateString".into(),
        };
        let marshal_err: MarshalError = engine_err.into();

        assert!(matches!(marshal_err, MarshalError::Engine(_)));
        assert!(marshal_err.to_string().contains("lou_translateString"));
    }

    #[test]
    fn test_worker_error_conversions() {
        let err: WorkerError = TableError::invalid_name("../etc").into();
        assert!(matches!(err, WorkerError::Table(_)));

        let err: WorkerError = MarshalError::overflow("too long").into();
        assert!(matches!(err, WorkerError::Marshal(_)));
    }

    #[test]
    fn test_is_load_failure() {
        assert!(EngineError::load_failed("bad magic").is_load_failure());
        assert!(EngineError::missing_export("malloc").is_load_failure());
        assert!(EngineError::UnsupportedCharSize { size: 3 }.is_load_failure());
        assert!(
            !EngineError::FuelExhausted {
                function: "free".into()
            }
            .is_load_failure()
        );
    }

    #[test]
    fn test_table_name() {
        assert_eq!(
            TableError::fetch_failed("a.ctb", "x").table_name(),
            "a.ctb"
        );
        assert_eq!(
            TableError::NotInstalled {
                name: "b.ctb".into()
            }
            .table_name(),
            "b.ctb"
        );
    }
}
