//! Worker execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: Per-worker state accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Log messages emitted by the engine
//! - [`ExecutionMetrics`]: Counters for foreign calls made by the worker

use std::path::Path;
use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::WasmEngine;
use louis_worker_common::{EngineError, ExecutionConfig};

/// Guest path under which the private table directory is mounted.
pub const GUEST_TABLE_ROOT: &str = "/";

/// State owned by the engine's store.
///
/// There is exactly one `WorkerContext` per translation worker. It lives
/// inside the [`Store`] of the worker's [`EngineHandle`](crate::EngineHandle)
/// and is dropped together with it.
///
/// # Contents
///
/// - `wasi`: WASI preview 1 context; the private table directory is
///   preopened at [`GUEST_TABLE_ROOT`]
/// - `limits`: Linear memory limits for the engine instance
/// - `context_id`: Identifier used in tracing output
/// - `logs`: Messages the engine emitted through its log callback
/// - `metrics`: Foreign call counters
pub struct WorkerContext {
    /// WASI context for system interface.
    wasi: WasiP1Ctx,

    /// Memory limits enforced through the store limiter.
    limits: StoreLimits,

    /// Identifier for tracing.
    pub context_id: String,

    /// Logs collected from the engine.
    pub logs: Vec<LogEntry>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    created_at: Instant,
}

/// A single log entry from the engine.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for engine logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Foreign call counters.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Completed `lou_translateString` calls.
    pub translations: u64,

    /// Fuel consumed by all foreign calls.
    pub fuel_consumed: u64,

    /// Duration of the most recent translation call.
    pub last_call: Option<Duration>,
}

/// Most log entries retained in a context; older entries are dropped.
const MAX_RETAINED_LOGS: usize = 1024;

impl WorkerContext {
    /// Create a new worker context.
    ///
    /// # Arguments
    ///
    /// * `context_id` - Identifier for this worker (for tracing)
    /// * `table_root` - Host directory exposed to the engine as its
    ///   filesystem, or `None` for an engine without file access
    /// * `max_memory_bytes` - Upper bound for the engine's linear memory
    pub fn new(
        context_id: String,
        table_root: Option<&Path>,
        max_memory_bytes: usize,
    ) -> Result<Self, EngineError> {
        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stderr();

        if let Some(root) = table_root {
            builder
                .preopened_dir(root, GUEST_TABLE_ROOT, DirPerms::all(), FilePerms::all())
                .map_err(|e| {
                    EngineError::load_failed(format!(
                        "Failed to preopen table directory {}: {e}",
                        root.display()
                    ))
                })?;
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(max_memory_bytes)
            .instances(1)
            .build();

        Ok(Self {
            wasi: builder.build_p1(),
            limits,
            context_id,
            logs: Vec::new(),
            metrics: ExecutionMetrics::default(),
            created_at: Instant::now(),
        })
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        if self.logs.len() >= MAX_RETAINED_LOGS {
            self.logs.remove(0);
        }
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Get the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Time since the context was created.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Create a new Wasmtime store around the given context.
///
/// The store enforces the context's memory limits and starts with the
/// configured fuel budget.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: WorkerContext,
) -> Result<Store<WorkerContext>, EngineError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    // Without metering the store still needs fuel, since the engine
    // always consumes it.
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| EngineError::load_failed(format!("Failed to set fuel: {e}")))?;

    Ok(store)
}
