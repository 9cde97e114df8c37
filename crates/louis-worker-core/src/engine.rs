//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the worker. It is:
//! - Cheap to clone and shared between compilation and instantiation
//! - Set up with fuel metering so runaway engine calls are cut off
//! - Configured for async calls, which WASI file access requires

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use louis_worker_common::{EngineConfig, EngineError};

/// Thread-safe WebAssembly engine wrapper.
///
/// This struct wraps a Wasmtime [`Engine`] configured for hosting a single
/// long-lived translation module. The engine itself holds no instance
/// state; the one live instance belongs to an
/// [`EngineHandle`](crate::EngineHandle).
///
/// # Example
///
/// ```ignore
/// use louis_worker_common::EngineConfig;
/// use louis_worker_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut wasmtime_config = Config::new();

        // WASI preview 1 file access from the guest is async on the host side
        wasmtime_config.async_support(true);

        // Fuel bounds every foreign call
        wasmtime_config.consume_fuel(true);

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            EngineError::load_failed(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            max_memory_mb = config.max_memory_mb,
            cache_compiled_modules = config.cache_compiled_modules,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("max_memory_mb", &self.config.max_memory_mb)
            .field("cache_compiled_modules", &self.config.cache_compiled_modules)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config);

        assert!(engine.is_ok());
        assert_eq!(engine.unwrap().config().max_memory_mb, 256);
    }

    #[test]
    fn test_engine_clone_shares_inner() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let clone = engine.clone();

        assert!(Engine::same(engine.inner(), clone.inner()));
    }

    #[test]
    fn test_engine_debug() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("max_memory_mb"));
    }
}
