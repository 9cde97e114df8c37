//! Linker setup and host callbacks for the engine module.
//!
//! The liblouis build imports WASI preview 1 for reading table files. The
//! only host function the engine calls back into is its log callback,
//! which is not imported but installed into the function table at runtime
//! via [`EngineHandle::register_log_callback`](louis_worker_core::EngineHandle::register_log_callback).

use louis_worker_common::EngineError;
use louis_worker_core::handle::MAX_C_STRING;
use louis_worker_core::store::WorkerContext;
use louis_worker_core::{WasmEngine, read_c_string};
use tracing::warn;
use wasmtime::{Caller, Linker};

use crate::logging::{LoggingHost, level_from_louis};

/// Create a linker with WASI preview 1 registered.
///
/// # Errors
///
/// Returns an error if registration fails.
pub fn create_linker(engine: &WasmEngine) -> Result<Linker<WorkerContext>, EngineError> {
    let mut linker = Linker::new(engine.inner());
    wasmtime_wasi::preview1::add_to_linker_async(&mut linker, WorkerContext::wasi_mut).map_err(
        |e| EngineError::load_failed(format!("Failed to register WASI preview 1: {e}")),
    )?;
    Ok(linker)
}

/// The engine log callback.
///
/// # Memory Protocol
///
/// The engine passes:
/// - `level`: liblouis log level (multiples of 10000)
/// - `ptr`: Pointer to a NUL-terminated message in guest memory
pub fn log_callback() -> impl Fn(Caller<'_, WorkerContext>, i32, i32) + Send + Sync + 'static {
    |mut caller: Caller<'_, WorkerContext>, level: i32, ptr: i32| {
        if ptr < 0 {
            warn!(ptr = ptr, "Invalid log message pointer (negative value)");
            return;
        }

        let Some(memory) = caller
            .get_export("memory")
            .and_then(wasmtime::Extern::into_memory)
        else {
            warn!("Memory export not found in engine module");
            return;
        };

        #[allow(clippy::cast_sign_loss)]
        let Some(message) = read_c_string(memory.data(&caller), ptr as u32, MAX_C_STRING) else {
            warn!(
                ptr = ptr,
                memory_size = memory.data_size(&caller),
                "Log message out of bounds or unterminated"
            );
            return;
        };

        LoggingHost::log(caller.data_mut(), level_from_louis(level), &message);
    }
}
