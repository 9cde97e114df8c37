//! Engine module compilation and caching.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`] that handles compiling the liblouis WebAssembly build and
//! caching the compiled artifact on disk.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at startup (slower cold start)
//! - **Cached**: Reuse an artifact serialized by an earlier startup

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Engine, Module};

use louis_worker_common::EngineError;

use crate::WasmEngine;

/// A compiled engine module.
///
/// This struct wraps a Wasmtime [`Module`] with the content hash of the
/// bytes it was compiled from.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be moved to the worker task
/// after compiling on a blocking thread.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled or loaded.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, EngineError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            EngineError::load_failed(format!("Module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Engine module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Read and compile a module from disk, using the compiled-module cache
    /// when the engine configuration enables it.
    ///
    /// A cache miss compiles from source and writes the artifact back; a
    /// failure to write the cache is logged and otherwise ignored.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &WasmEngine, path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::load_failed(format!(
                "Failed to read engine module {}: {e}",
                path.display()
            ))
        })?;

        let Some(cache_dir) = cache_dir(engine) else {
            return Self::from_bytes(engine.inner(), &bytes);
        };

        let artifact = cache_dir.join(format!("{}.cwasm", compute_hash(&bytes)));
        if artifact.exists() {
            match Self::from_precompiled(engine.inner(), &artifact) {
                Ok(module) => return Ok(module),
                Err(e) => warn!(error = %e, "Discarding unusable cached module"),
            }
        }

        let module = Self::from_bytes(engine.inner(), &bytes)?;
        if let Err(e) = module.write_cache(&cache_dir, &artifact) {
            warn!(error = %e, artifact = %artifact.display(), "Failed to cache compiled module");
        }
        Ok(module)
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// This deserializes pre-compiled machine code. Only artifacts written
    /// by [`CompiledModule::serialize`] with the same Wasmtime version are
    /// accepted; anything else is rejected by Wasmtime's header check.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: artifacts in the cache directory are written by `write_cache`
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            EngineError::load_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        // Cache artifacts are named {hash}.cwasm
        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, EngineError> {
        let module = Module::new(engine, wat)
            .map_err(|e| EngineError::load_failed(format!("WAT compilation failed: {e}")))?;

        Ok(Self {
            inner: module,
            content_hash: compute_hash(wat.as_bytes()),
            compiled_at: Instant::now(),
        })
    }

    /// Serialize the compiled module for caching.
    pub fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        self.inner
            .serialize()
            .map_err(|e| EngineError::load_failed(format!("Module serialization failed: {e}")))
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    fn write_cache(&self, dir: &Path, artifact: &Path) -> Result<(), EngineError> {
        let bytes = self.serialize()?;
        std::fs::create_dir_all(dir)
            .and_then(|()| std::fs::write(artifact, bytes))
            .map_err(|e| EngineError::load_failed(format!("Cache write failed: {e}")))?;
        debug!(artifact = %artifact.display(), "Compiled module cached");
        Ok(())
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), EngineError> {
        if bytes.len() < 8 {
            return Err(EngineError::load_failed("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(EngineError::load_failed("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

fn cache_dir(engine: &WasmEngine) -> Option<PathBuf> {
    let config = engine.config();
    if !config.cache_compiled_modules {
        return None;
    }
    config.cache_dir.as_ref().map(PathBuf::from)
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
