//! The single live instance of the translation engine.
//!
//! [`EngineHandle`] owns the Wasmtime [`Store`] and the instantiated engine
//! module. It resolves the liblouis exports once at load time and exposes:
//!
//! 1. The raw `lou_translateString` call
//! 2. Best-effort version introspection
//! 3. Guest allocation and bounds-checked memory access for the marshaller
//! 4. One-time registration of the engine's log callback
//!
//! The handle is neither `Clone` nor shareable: the worker that loads it is
//! its only owner, and every foreign call goes through `&mut self`.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{
    Caller, Func, Instance, Linker, Memory, Ref, Store, Table, Trap, TypedFunc, WasmParams,
    WasmResults,
};

use louis_worker_common::{EngineError, ExecutionConfig, MarshalError};

use crate::CompiledModule;
use crate::store::WorkerContext;
use crate::widechar::UnitWidth;

/// Longest C string read back from the engine (version, log messages).
pub const MAX_C_STRING: usize = 4096;

type TranslateParams = (i32, i32, i32, i32, i32, i32, i32, i32);

/// Guest pointers for one `lou_translateString` call.
///
/// `input_len` and `output_len` point at guest `int`s that the engine
/// reads and overwrites: input units consumed and output units written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslateArgs {
    /// NUL-terminated table list (`const char *`).
    pub table_list: u32,
    /// Input buffer (`const widechar *`).
    pub input: u32,
    /// In/out input length (`int *`).
    pub input_len: u32,
    /// Output buffer (`widechar *`).
    pub output: u32,
    /// In/out output length (`int *`).
    pub output_len: u32,
    /// Translation mode bits.
    pub mode: u32,
}

/// Resolved engine exports.
struct EngineExports {
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    translate: TypedFunc<TranslateParams, i32>,
    register_log_callback: Option<TypedFunc<i32, ()>>,
    function_table: Option<Table>,
}

/// Exclusive owner of the loaded translation engine.
pub struct EngineHandle {
    store: Store<WorkerContext>,
    instance: Instance,
    exports: EngineExports,
    unit_width: UnitWidth,
    version: Option<String>,
    log_callback_slot: Option<u32>,
    fuel_budget: Option<u64>,
    outstanding: usize,
    deferred_frees: Vec<u32>,
}

impl EngineHandle {
    /// Instantiate the engine module and resolve its exports.
    ///
    /// Reactor builds have `_initialize` run exactly once here. The
    /// wide-character width is queried from `lou_charSize` and fixed for
    /// the lifetime of the handle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LoadFailed`] if instantiation or
    /// initialization fails, [`EngineError::MissingExport`] if a required
    /// export is absent, and [`EngineError::UnsupportedCharSize`] for a
    /// width other than 2 or 4.
    #[instrument(skip_all, fields(content_hash = %module.content_hash()))]
    pub async fn load(
        module: &CompiledModule,
        linker: &Linker<WorkerContext>,
        mut store: Store<WorkerContext>,
        config: &ExecutionConfig,
    ) -> Result<Self, EngineError> {
        let start = Instant::now();

        let instance = linker
            .instantiate_async(&mut store, module.as_module())
            .await
            .map_err(|e| EngineError::load_failed(format!("Instantiation failed: {e}")))?;

        let exports = EngineExports {
            memory: instance
                .get_memory(&mut store, "memory")
                .ok_or_else(|| EngineError::missing_export("memory"))?,
            malloc: required(&instance, &mut store, "malloc")?,
            free: required(&instance, &mut store, "free")?,
            translate: required(&instance, &mut store, "lou_translateString")?,
            register_log_callback: optional(&instance, &mut store, "lou_registerLogCallback")?,
            function_table: instance.get_table(&mut store, "__indirect_function_table"),
        };
        let char_size: TypedFunc<(), i32> = required(&instance, &mut store, "lou_charSize")?;
        let initialize: Option<TypedFunc<(), ()>> =
            optional(&instance, &mut store, "_initialize")?;
        let lou_version: Option<TypedFunc<(), i32>> =
            optional(&instance, &mut store, "lou_version")?;

        let mut handle = Self {
            store,
            instance,
            exports,
            // Placeholder until lou_charSize has been called below.
            unit_width: UnitWidth::Two,
            version: None,
            log_callback_slot: None,
            fuel_budget: config.fuel_metering.then_some(config.max_fuel),
            outstanding: 0,
            deferred_frees: Vec::new(),
        };

        if let Some(initialize) = initialize {
            handle
                .call("_initialize", initialize, ())
                .await
                .map_err(|e| EngineError::load_failed(format!("Engine initialization failed: {e}")))?;
        }

        let size = handle
            .call("lou_charSize", char_size, ())
            .await
            .map_err(|e| EngineError::load_failed(e.to_string()))?;
        handle.unit_width = UnitWidth::from_char_size(size)?;

        if let Some(lou_version) = lou_version {
            handle.version = match handle.call("lou_version", lou_version, ()).await {
                Ok(ptr) => handle.read_c_string(guest_address(ptr)),
                Err(e) => {
                    warn!(error = %e, "lou_version failed; version unknown");
                    None
                }
            };
        }

        info!(
            version = handle.version(),
            unit_width = handle.unit_width.bytes(),
            duration_ms = start.elapsed().as_millis(),
            "Engine loaded"
        );

        Ok(handle)
    }

    /// Call `lou_translateString` with guest pointers prepared by the caller.
    ///
    /// The raw return value is passed through unchanged; callers treat the
    /// in/out length parameters as the authoritative result.
    pub async fn translate(&mut self, args: TranslateArgs) -> Result<i32, EngineError> {
        let start = Instant::now();
        let translate = self.exports.translate.clone();
        let params = (
            guest_ptr(args.table_list),
            guest_ptr(args.input),
            guest_ptr(args.input_len),
            guest_ptr(args.output),
            guest_ptr(args.output_len),
            0, // typeform
            0, // spacing
            guest_ptr(args.mode),
        );

        let result = self.call("lou_translateString", translate, params).await;

        let metrics = &mut self.store.data_mut().metrics;
        metrics.last_call = Some(start.elapsed());
        if result.is_ok() {
            metrics.translations += 1;
        }
        result
    }

    /// Engine version string, or `""` if the engine does not report one.
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }

    /// Width of one engine wide-character unit.
    pub fn unit_width(&self) -> UnitWidth {
        self.unit_width
    }

    /// Register the engine's log callback.
    ///
    /// The callback is appended to the engine's function table and its
    /// slot passed to `lou_registerLogCallback`. Registration happens at
    /// most once per handle: later calls return `Ok(false)` without
    /// touching the table or the engine. Engines without log callback
    /// support also return `Ok(false)`.
    pub async fn register_log_callback<F>(&mut self, callback: F) -> Result<bool, EngineError>
    where
        F: Fn(Caller<'_, WorkerContext>, i32, i32) + Send + Sync + 'static,
    {
        if let Some(slot) = self.log_callback_slot {
            debug!(slot, "Log callback already registered");
            return Ok(false);
        }

        let (Some(register), Some(table)) = (
            self.exports.register_log_callback.clone(),
            self.exports.function_table,
        ) else {
            debug!("Engine does not support log callbacks");
            return Ok(false);
        };

        let func = Func::wrap(&mut self.store, callback);
        let slot = table
            .grow(&mut self.store, 1, Ref::Func(Some(func)))
            .map_err(|e| EngineError::load_failed(format!("Function table grow failed: {e}")))?;
        let slot = u32::try_from(slot).map_err(|_| {
            EngineError::load_failed(format!("Function table slot {slot} out of range"))
        })?;

        self.call("lou_registerLogCallback", register, guest_ptr(slot))
            .await?;
        self.log_callback_slot = Some(slot);

        debug!(slot, "Log callback registered");
        Ok(true)
    }

    /// Function table slot holding the registered log callback.
    pub fn log_callback_slot(&self) -> Option<u32> {
        self.log_callback_slot
    }

    /// Number of entries in the engine's function table, if exported.
    pub fn function_table_size(&self) -> Option<u64> {
        self.exports
            .function_table
            .map(|table| u64::from(table.size(&self.store)))
    }

    /// Read an exported `i32` global.
    pub fn exported_global(&mut self, name: &str) -> Option<i32> {
        self.instance
            .get_global(&mut self.store, name)
            .and_then(|global| global.get(&mut self.store).i32())
    }

    /// Allocate `bytes` bytes of guest memory.
    pub async fn malloc(&mut self, bytes: usize) -> Result<u32, MarshalError> {
        let size = i32::try_from(bytes)
            .map_err(|_| MarshalError::overflow(format!("allocation of {bytes} bytes")))?;
        let malloc = self.exports.malloc.clone();
        let ptr = self.call("malloc", malloc, size).await?;
        if ptr == 0 {
            return Err(MarshalError::AllocationFailed { bytes });
        }
        self.outstanding += 1;
        Ok(guest_address(ptr))
    }

    /// Release guest memory obtained from [`EngineHandle::malloc`].
    pub async fn free(&mut self, address: u32) -> Result<(), EngineError> {
        let free = self.exports.free.clone();
        self.call("free", free, guest_ptr(address)).await?;
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }

    /// Queue allocations whose owner could not free them in place.
    ///
    /// They are released by the next [`EngineHandle::collect_deferred`].
    pub(crate) fn defer_free(&mut self, addresses: impl IntoIterator<Item = u32>) {
        self.deferred_frees.extend(addresses);
    }

    /// Free every queued allocation. Returns the number released.
    pub async fn collect_deferred(&mut self) -> usize {
        let pending = std::mem::take(&mut self.deferred_frees);
        let mut released = 0;
        for address in pending {
            match self.free(address).await {
                Ok(()) => released += 1,
                Err(e) => warn!(address, error = %e, "Deferred free failed"),
            }
        }
        if released > 0 {
            debug!(released, "Deferred allocations released");
        }
        released
    }

    /// Allocations made through this handle and not yet freed.
    ///
    /// Deferred allocations count until they are collected.
    pub fn outstanding_allocations(&self) -> usize {
        self.outstanding
    }

    /// Write `bytes` into guest memory at `address`.
    pub fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<(), MarshalError> {
        self.exports
            .memory
            .write(&mut self.store, address as usize, bytes)
            .map_err(|_| MarshalError::OutOfBounds {
                address,
                len: bytes.len(),
            })
    }

    /// Read `len` bytes of guest memory at `address`.
    pub fn read_bytes(&self, address: u32, len: usize) -> Result<Vec<u8>, MarshalError> {
        let mut buf = vec![0; len];
        self.exports
            .memory
            .read(&self.store, address as usize, &mut buf)
            .map_err(|_| MarshalError::OutOfBounds { address, len })?;
        Ok(buf)
    }

    /// Write a guest `int`.
    pub fn write_i32(&mut self, address: u32, value: i32) -> Result<(), MarshalError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Read a guest `int`.
    pub fn read_i32(&self, address: u32) -> Result<i32, MarshalError> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a NUL-terminated string from guest memory.
    pub fn read_c_string(&self, address: u32) -> Option<String> {
        read_c_string(self.exports.memory.data(&self.store), address, MAX_C_STRING)
    }

    /// Get the worker context.
    pub fn context(&self) -> &WorkerContext {
        self.store.data()
    }

    /// Get the worker context mutably.
    pub fn context_mut(&mut self) -> &mut WorkerContext {
        self.store.data_mut()
    }

    /// Run one export with a fresh fuel budget.
    async fn call<P, R>(
        &mut self,
        function: &'static str,
        func: TypedFunc<P, R>,
        params: P,
    ) -> Result<R, EngineError>
    where
        P: WasmParams + Send + Sync,
        R: WasmResults + Send + Sync,
    {
        if let Some(budget) = self.fuel_budget {
            self.store
                .set_fuel(budget)
                .map_err(|e| EngineError::Trap {
                    function: function.into(),
                    message: format!("Failed to set fuel: {e}"),
                })?;
        }

        let result = func.call_async(&mut self.store, params).await;

        if let Some(budget) = self.fuel_budget {
            let remaining = self.store.get_fuel().unwrap_or(0);
            self.store.data_mut().metrics.fuel_consumed += budget.saturating_sub(remaining);
        }

        result.map_err(|e| call_error(function, &e))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("version", &self.version)
            .field("unit_width", &self.unit_width)
            .field("log_callback_slot", &self.log_callback_slot)
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}

/// Read a NUL-terminated string of at most `max` bytes from `memory`.
///
/// Returns `None` if `address` is out of bounds or no terminator is found
/// within `max` bytes. Invalid UTF-8 is replaced lossily.
pub fn read_c_string(memory: &[u8], address: u32, max: usize) -> Option<String> {
    let start = address as usize;
    let window = memory.get(start..)?;
    let window = &window[..window.len().min(max)];
    let end = window.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&window[..end]).into_owned())
}

fn required<P, R>(
    instance: &Instance,
    store: &mut Store<WorkerContext>,
    name: &str,
) -> Result<TypedFunc<P, R>, EngineError>
where
    P: WasmParams,
    R: WasmResults,
{
    optional(instance, store, name)?.ok_or_else(|| EngineError::missing_export(name))
}

fn optional<P, R>(
    instance: &Instance,
    store: &mut Store<WorkerContext>,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>, EngineError>
where
    P: WasmParams,
    R: WasmResults,
{
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<P, R>(&*store)
        .map(Some)
        .map_err(|e| EngineError::load_failed(format!("Export '{name}' has the wrong type: {e}")))
}

/// Map a failed call to an [`EngineError`].
fn call_error(function: &str, error: &wasmtime::Error) -> EngineError {
    if error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
    {
        return EngineError::FuelExhausted {
            function: function.into(),
        };
    }
    EngineError::Trap {
        function: function.into(),
        message: error.to_string(),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn guest_ptr(address: u32) -> i32 {
    address as i32
}

#[allow(clippy::cast_sign_loss)]
fn guest_address(ptr: i32) -> u32 {
    ptr as u32
}
