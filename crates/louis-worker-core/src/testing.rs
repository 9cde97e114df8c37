//! An engine double for tests.
//!
//! [`FakeEngine`] generates a small WAT module that implements the same
//! exports as a liblouis WebAssembly build. Its `lou_translateString`
//! copies every input unit `repeat` times, which makes output size easy to
//! control. The module exports counters so tests can check what the host
//! did to it:
//!
//! - `live_allocations`: `malloc` calls not yet matched by `free`
//! - `initialize_calls`: times `_initialize` ran
//! - `last_mode`: mode bits of the most recent translation
//!
//! A table list starting with NUL makes translation return 0 without
//! touching the length cells.

use wasmtime::Linker;

use louis_worker_common::{EngineError, ExecutionConfig};

use crate::store::{WorkerContext, create_store};
use crate::{CompiledModule, EngineHandle, WasmEngine};

/// Memory given to fake engine stores.
const FAKE_MEMORY_BYTES: usize = 64 * 1024 * 1024;

/// Failure injected into the fake's translate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Translate normally.
    #[default]
    None,
    /// Trap with `unreachable`.
    Trap,
    /// Loop forever until fuel runs out.
    Spin,
}

/// Parameters of the generated engine module.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    /// Value returned by `lou_charSize`.
    pub char_size: i32,
    /// Output units written per input unit.
    pub repeat: u32,
    /// Report one more output unit than the capacity.
    pub overreport: bool,
    /// Failure injected into translation.
    pub fault: Fault,
    /// Export `lou_registerLogCallback` and a function table.
    pub log_callbacks: bool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            char_size: 2,
            repeat: 1,
            overreport: false,
            fault: Fault::None,
            log_callbacks: true,
        }
    }
}

impl FakeEngine {
    /// A fake with 16-bit units.
    pub fn utf16() -> Self {
        Self::default()
    }

    /// A fake with 32-bit units.
    pub fn utf32() -> Self {
        Self {
            char_size: 4,
            ..Self::default()
        }
    }

    /// Set the expansion per input unit.
    #[must_use]
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the injected fault.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Render the module as WAT.
    pub fn to_wat(&self) -> String {
        let (load, store, width) = if self.char_size == 4 {
            ("i32.load", "i32.store", 4)
        } else {
            ("i32.load16_u", "i32.store16", 2)
        };
        let fault = match self.fault {
            Fault::None => "",
            Fault::Trap => "(unreachable)",
            Fault::Spin => "(loop $spin (br $spin))",
        };
        let written = if self.overreport {
            "(i32.add (local.get $cap) (i32.const 1))"
        } else {
            "(local.get $w)"
        };
        let repeat = self.repeat;
        let char_size = self.char_size;

        let mut wat = format!(
            r#"(module
  (type $log_fn (func (param i32 i32)))
  (memory (export "memory") 2)
  (global $heap (mut i32) (i32.const 1024))
  (global $live (export "live_allocations") (mut i32) (i32.const 0))
  (global $inits (export "initialize_calls") (mut i32) (i32.const 0))
  (global $last_mode (export "last_mode") (mut i32) (i32.const 0))
  (global $log_cb (mut i32) (i32.const -1))
  (data (i32.const 16) "3.29.0-fake\00")
  (data (i32.const 64) "fake translation\00")

  (func (export "_initialize")
    (global.set $inits (i32.add (global.get $inits) (i32.const 1))))

  (func (export "malloc") (param $size i32) (result i32)
    (local $ptr i32) (local $end i32) (local $top i32)
    (local.set $ptr (global.get $heap))
    (local.set $end
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $size)) (i32.const 7))
        (i32.const -8)))
    (local.set $top (i32.mul (memory.size) (i32.const 65536)))
    (if (i32.gt_u (local.get $end) (local.get $top))
      (then
        (if (i32.eq
              (memory.grow
                (i32.add
                  (i32.shr_u (i32.sub (local.get $end) (local.get $top)) (i32.const 16))
                  (i32.const 1)))
              (i32.const -1))
          (then (return (i32.const 0))))))
    (global.set $heap (local.get $end))
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (local.get $ptr))

  (func (export "free") (param $ptr i32)
    (if (local.get $ptr)
      (then (global.set $live (i32.sub (global.get $live) (i32.const 1))))))

  (func (export "lou_charSize") (result i32) (i32.const {char_size}))

  (func (export "lou_version") (result i32) (i32.const 16))
"#
        );

        if self.log_callbacks {
            wat.push_str(
                r#"
  (table (export "__indirect_function_table") 1 funcref)

  (func (export "lou_registerLogCallback") (param $slot i32)
    (global.set $log_cb (local.get $slot)))

  (func $emit_log
    (if (i32.ge_s (global.get $log_cb) (i32.const 0))
      (then
        (call_indirect (type $log_fn)
          (i32.const 20000) (i32.const 64) (global.get $log_cb)))))
"#
            );
        } else {
            wat.push_str("\n  (func $emit_log)\n");
        }

        wat.push_str(&format!(
            r#"
  (func (export "lou_translateString")
    (param $tables i32) (param $in i32) (param $inlen i32)
    (param $out i32) (param $outlen i32)
    (param $typeform i32) (param $spacing i32) (param $mode i32)
    (result i32)
    (local $n i32) (local $cap i32) (local $i i32) (local $j i32)
    (local $w i32) (local $unit i32)
    {fault}
    (global.set $last_mode (local.get $mode))
    (if (i32.eqz (i32.load8_u (local.get $tables)))
      (then (return (i32.const 0))))
    (call $emit_log)
    (local.set $n (i32.load (local.get $inlen)))
    (local.set $cap (i32.load (local.get $outlen)))
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $n)))
        (br_if $done
          (i32.gt_u (i32.add (local.get $w) (i32.const {repeat})) (local.get $cap)))
        (local.set $unit
          ({load} (i32.add (local.get $in) (i32.mul (local.get $i) (i32.const {width})))))
        (local.set $j (i32.const 0))
        (block $copied
          (loop $copy
            (br_if $copied (i32.ge_u (local.get $j) (i32.const {repeat})))
            ({store}
              (i32.add (local.get $out) (i32.mul (local.get $w) (i32.const {width})))
              (local.get $unit))
            (local.set $w (i32.add (local.get $w) (i32.const 1)))
            (local.set $j (i32.add (local.get $j) (i32.const 1)))
            (br $copy)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (i32.store (local.get $inlen) (local.get $i))
    (i32.store (local.get $outlen) {written})
    (i32.const 1))
)
"#
        ));

        wat
    }

    /// Compile the module.
    pub fn compile(&self, engine: &WasmEngine) -> Result<CompiledModule, EngineError> {
        CompiledModule::from_wat(engine.inner(), &self.to_wat())
    }

    /// Compile and load the module into a fresh handle.
    ///
    /// The fake imports nothing, so an empty linker is enough.
    pub async fn load(
        &self,
        engine: &WasmEngine,
        config: &ExecutionConfig,
    ) -> Result<EngineHandle, EngineError> {
        let module = self.compile(engine)?;
        let linker = Linker::new(engine.inner());
        let context = WorkerContext::new("fake".into(), None, FAKE_MEMORY_BYTES)?;
        let store = create_store(engine, config, context)?;
        EngineHandle::load(&module, &linker, store, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use louis_worker_common::EngineConfig;

    #[test]
    fn test_wat_compiles_for_every_shape() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let shapes = [
            FakeEngine::utf16(),
            FakeEngine::utf32().with_repeat(3),
            FakeEngine::utf16().with_fault(Fault::Trap),
            FakeEngine::utf32().with_fault(Fault::Spin),
            FakeEngine {
                overreport: true,
                log_callbacks: false,
                ..FakeEngine::default()
            },
        ];

        for shape in shapes {
            assert!(shape.compile(&engine).is_ok(), "{shape:?}");
        }
    }
}
