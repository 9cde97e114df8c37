//! Translation worker for louis-worker.
//!
//! This crate provides the message-based interface to the braille engine:
//!
//! - A worker task that owns the engine and its tables
//! - Typed requests and responses correlated by id
//! - The readiness state machine gating translations
//! - A caller-side debouncer and BRF helpers
//!
//! # Quick Start
//!
//! ```ignore
//! use louis_worker_common::RuntimeConfig;
//! use louis_worker_service::{TranslatePayload, WorkerOptions, spawn_worker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = spawn_worker(WorkerOptions::new(RuntimeConfig::default()))?;
//!
//!     client.init().await?;
//!     let reply = client
//!         .translate(TranslatePayload::new("hello", "en-ueb-g2.ctb"))
//!         .await?;
//!     println!("{reply:?}");
//!
//!     Ok(())
//! }
//! ```

pub mod brf;
pub mod debounce;
pub mod protocol;
pub mod state;
pub mod worker;

pub use debounce::{Debounced, Debouncer, GenerationGate};
pub use protocol::{
    Envelope, ErrorKind, ErrorPayload, MathCode, ModeFlags, Request, RequestId, Response,
    TableStatus, TranslatePayload, TranslationMode, WorkerStatus,
};
pub use state::{InitAction, ReadinessState};
pub use worker::{
    ModuleSource, PendingReply, WorkerClient, WorkerOptions, spawn as spawn_worker,
};
