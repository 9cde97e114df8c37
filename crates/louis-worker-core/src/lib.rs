//! Wasmtime host for the liblouis translation engine.
//!
//! This crate owns everything that touches the engine's linear memory:
//! - [`WasmEngine`]: Configured Wasmtime engine (async, fuel metered)
//! - [`CompiledModule`]: Compiled engine module with an optional disk cache
//! - [`WorkerContext`]: Store data; WASI context, limits, logs, metrics
//! - [`EngineHandle`]: The single live engine instance
//! - [`translate_with`]: Marshals one translation through scratch buffers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared, thread-safe)                                  │
//! │  - Async support for WASI file access                   │
//! │  - Fuel metering                                        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (liblouis build, compiled once per process)            │
//! │  - Optional .cwasm cache keyed by content hash          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          EngineHandle (Store<WorkerContext>)            │
//! │  (One per worker, never cloned)                         │
//! │  - Resolved exports and unit width                      │
//! │  - Private table directory preopened at /               │
//! │  - Log callback, registered once                        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ScratchArena                         │
//! │  (One per translation)                                  │
//! │  - malloc/free in guest memory                          │
//! │  - Wide-character encode/decode                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod handle;
pub mod marshal;
pub mod module;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod widechar;

pub use engine::WasmEngine;
pub use handle::{EngineHandle, TranslateArgs, read_c_string};
pub use marshal::{
    ScratchArena, ScratchBuffer, TranslationRequest, TranslationResult, translate_with,
};
pub use module::CompiledModule;
pub use store::{
    ExecutionMetrics, GUEST_TABLE_ROOT, LogEntry, LogLevel, WorkerContext, create_store,
};
pub use widechar::UnitWidth;
