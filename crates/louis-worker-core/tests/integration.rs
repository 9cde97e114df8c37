//! Integration tests for louis-worker-core.
//!
//! These tests drive the engine double through the full pipeline:
//! - WAT compilation to module
//! - Engine handle load and export resolution
//! - Scratch allocation, marshalling, and release
//! - Log callback registration
//! - Trap and fuel handling

use std::sync::{Arc, Mutex};

use louis_worker_common::{EngineConfig, EngineError, ExecutionConfig, MarshalError};
use louis_worker_core::handle::MAX_C_STRING;
use louis_worker_core::testing::{FakeEngine, Fault};
use louis_worker_core::{
    CompiledModule, EngineHandle, ScratchArena, TranslationRequest, UnitWidth, WasmEngine,
    WorkerContext, create_store, read_c_string, translate_with,
};
use tokio_test::assert_ok;
use wasmtime::{Caller, Extern, Linker};

const TABLE: &str = "en-ueb-g2.ctb";

fn engine() -> WasmEngine {
    WasmEngine::new(&EngineConfig::default()).unwrap()
}

async fn load(fake: &FakeEngine, config: &ExecutionConfig) -> EngineHandle {
    fake.load(&engine(), config).await.unwrap()
}

fn live(handle: &mut EngineHandle) -> i32 {
    handle.exported_global("live_allocations").unwrap()
}

fn sample_text(len: usize) -> String {
    "the quick brown fox jumps over the lazy dog "
        .chars()
        .cycle()
        .take(len)
        .collect()
}

// ============================================================================
// Test: Load
// ============================================================================

#[tokio::test]
async fn test_load_reads_width_and_version() {
    let config = ExecutionConfig::default();

    let mut handle = load(&FakeEngine::utf16(), &config).await;
    assert_eq!(handle.unit_width(), UnitWidth::Two);
    assert_eq!(handle.version(), "3.29.0-fake");
    assert_eq!(handle.exported_global("initialize_calls"), Some(1));

    let handle = load(&FakeEngine::utf32(), &config).await;
    assert_eq!(handle.unit_width(), UnitWidth::Four);
}

#[tokio::test]
async fn test_load_rejects_unsupported_char_size() {
    let fake = FakeEngine {
        char_size: 3,
        ..FakeEngine::default()
    };

    let result = fake.load(&engine(), &ExecutionConfig::default()).await;
    assert!(matches!(
        result,
        Err(EngineError::UnsupportedCharSize { size: 3 })
    ));
}

#[tokio::test]
async fn test_load_reports_missing_export() {
    let wat = r#"
        (module
            (memory (export "memory") 1)
        )
    "#;

    let engine = engine();
    let config = ExecutionConfig::default();
    let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
    let context = WorkerContext::new("missing".into(), None, 16 * 1024 * 1024).unwrap();
    let store = create_store(&engine, &config, context).unwrap();
    let linker = Linker::new(engine.inner());

    let result = EngineHandle::load(&module, &linker, store, &config).await;
    assert!(matches!(result, Err(EngineError::MissingExport { name }) if name == "malloc"));
}

#[tokio::test]
async fn test_version_is_empty_without_export() {
    let wat = FakeEngine::utf16()
        .to_wat()
        .replace(r#"(func (export "lou_version") (result i32) (i32.const 16))"#, "");

    let engine = engine();
    let config = ExecutionConfig::default();
    let module = CompiledModule::from_wat(engine.inner(), &wat).unwrap();
    let context = WorkerContext::new("no-version".into(), None, 16 * 1024 * 1024).unwrap();
    let store = create_store(&engine, &config, context).unwrap();

    let handle = EngineHandle::load(&module, &Linker::new(engine.inner()), store, &config)
        .await
        .unwrap();
    assert_eq!(handle.version(), "");
}

// ============================================================================
// Test: Marshalling
// ============================================================================

#[tokio::test]
async fn test_translate_hello() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("hello", TABLE), &config)
        .await
        .unwrap();

    assert_eq!(result.braille, "hello");
    assert_eq!(result.input_units, 5);
    assert_eq!(result.output_units, 5);
    assert_eq!(handle.context().metrics.translations, 1);
}

#[tokio::test]
async fn test_lengths_at_both_widths_release_everything() {
    let config = ExecutionConfig::default();

    for fake in [FakeEngine::utf16(), FakeEngine::utf32()] {
        let mut handle = load(&fake, &config).await;

        for len in [0, 1, 2, 17, 255, 256, 1000, 10_000] {
            let text = sample_text(len);
            let result = translate_with(&mut handle, &TranslationRequest::new(&text, TABLE), &config)
                .await
                .unwrap();

            assert_eq!(result.braille, text, "len {len}, width {}", fake.char_size);
            assert_eq!(live(&mut handle), 0);
            assert_eq!(handle.outstanding_allocations(), 0);
        }
    }
}

#[tokio::test]
async fn test_empty_input_skips_engine() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("", TABLE), &config)
        .await
        .unwrap();

    assert_eq!(result.braille, "");
    assert_eq!(handle.context().metrics.translations, 0);
}

#[tokio::test]
async fn test_repeated_translation_is_identical() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf32().with_repeat(2), &config).await;
    let request = TranslationRequest::new("Braille ⠃", TABLE);

    let first = assert_ok!(translate_with(&mut handle, &request, &config).await);
    let second = assert_ok!(translate_with(&mut handle, &request, &config).await);

    assert_eq!(first, second);
    assert_eq!(first.braille, "BBrraaiillllee  ⠃⠃");
}

#[tokio::test]
async fn test_non_bmp_text_in_utf16() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("a🙂b", TABLE), &config)
        .await
        .unwrap();

    assert_eq!(result.braille, "a🙂b");
    assert_eq!(result.input_units, 4);
}

#[tokio::test]
async fn test_expansion_within_capacity() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16().with_repeat(4), &config).await;
    let text = sample_text(500);

    let result = translate_with(&mut handle, &TranslationRequest::new(&text, TABLE), &config)
        .await
        .unwrap();

    assert_eq!(result.output_units, 2000);
}

#[tokio::test]
async fn test_mode_bits_reach_engine() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;
    let request = TranslationRequest::new("abc", TABLE).with_mode(1 | 4);

    translate_with(&mut handle, &request, &config).await.unwrap();

    assert_eq!(handle.exported_global("last_mode"), Some(5));
}

// ============================================================================
// Test: Failures
// ============================================================================

#[tokio::test]
async fn test_truncated_output_is_overflow() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16().with_repeat(10), &config).await;
    let text = sample_text(100);

    let result = translate_with(&mut handle, &TranslationRequest::new(&text, TABLE), &config).await;

    assert!(matches!(result, Err(MarshalError::EncodingOverflow { .. })));
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_input_limit_checked_before_engine() {
    let config = ExecutionConfig {
        max_input_units: 8,
        ..Default::default()
    };
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result =
        translate_with(&mut handle, &TranslationRequest::new("123456789", TABLE), &config).await;

    assert!(matches!(result, Err(MarshalError::EncodingOverflow { .. })));
    assert_eq!(handle.context().metrics.translations, 0);
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_overreported_length_is_rejected() {
    let config = ExecutionConfig::default();
    let fake = FakeEngine {
        overreport: true,
        ..FakeEngine::default()
    };
    let mut handle = load(&fake, &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("hello", TABLE), &config).await;

    assert!(matches!(result, Err(MarshalError::InvalidOutput { .. })));
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_zero_return_without_progress_fails() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("hello", ""), &config).await;

    assert!(matches!(result, Err(MarshalError::TranslationFailed { .. })));
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_trap_releases_scratch_buffers() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16().with_fault(Fault::Trap), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("hello", TABLE), &config).await;

    assert!(matches!(
        result,
        Err(MarshalError::Engine(EngineError::Trap { function, .. })) if function == "lou_translateString"
    ));
    assert_eq!(live(&mut handle), 0);
    assert_eq!(handle.outstanding_allocations(), 0);
}

#[tokio::test]
async fn test_runaway_translation_exhausts_fuel() {
    let config = ExecutionConfig {
        max_fuel: 1_000_000,
        ..Default::default()
    };
    let mut handle = load(&FakeEngine::utf16().with_fault(Fault::Spin), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("hello", TABLE), &config).await;

    assert!(matches!(
        result,
        Err(MarshalError::Engine(EngineError::FuelExhausted { .. }))
    ));
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_interior_nul_is_rejected_without_allocating() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = translate_with(&mut handle, &TranslationRequest::new("a\0b", TABLE), &config).await;

    assert!(matches!(result, Err(MarshalError::InvalidInput { .. })));
    assert_eq!(handle.outstanding_allocations(), 0);
}

// ============================================================================
// Test: Scratch Arena
// ============================================================================

#[tokio::test]
async fn test_dropped_arena_defers_frees() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    {
        let mut arena = ScratchArena::new(&mut handle);
        let buffer = arena.alloc_units(16).await.unwrap();
        assert_eq!(buffer.units(), Some(16));
        arena.alloc_bytes(8).await.unwrap();
        assert_eq!(arena.live(), 2);
    }

    assert_eq!(handle.outstanding_allocations(), 2);
    assert_eq!(live(&mut handle), 2);

    assert_eq!(handle.collect_deferred().await, 2);
    assert_eq!(handle.outstanding_allocations(), 0);
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_next_translation_collects_deferred_frees() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    {
        let mut arena = ScratchArena::new(&mut handle);
        arena.alloc_bytes(32).await.unwrap();
    }

    translate_with(&mut handle, &TranslationRequest::new("hi", TABLE), &config)
        .await
        .unwrap();
    assert_eq!(live(&mut handle), 0);
}

#[tokio::test]
async fn test_bounds_checked_memory_access() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;

    let result = handle.write_bytes(u32::MAX - 2, b"abcd");
    assert!(matches!(result, Err(MarshalError::OutOfBounds { .. })));

    let result = handle.read_bytes(u32::MAX - 2, 4);
    assert!(matches!(result, Err(MarshalError::OutOfBounds { .. })));
}

// ============================================================================
// Test: Log Callback
// ============================================================================

type Captured = Arc<Mutex<Vec<(i32, String)>>>;

fn capture(sink: &Captured) -> impl Fn(Caller<'_, WorkerContext>, i32, i32) + Send + Sync + 'static {
    let sink = Arc::clone(sink);
    move |mut caller: Caller<'_, WorkerContext>, level: i32, ptr: i32| {
        let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
            return;
        };
        let message = read_c_string(memory.data(&caller), ptr as u32, MAX_C_STRING);
        sink.lock().unwrap().push((level, message.unwrap_or_default()));
    }
}

#[tokio::test]
async fn test_log_callback_registered_once() {
    let config = ExecutionConfig::default();
    let mut handle = load(&FakeEngine::utf16(), &config).await;
    let sink = Captured::default();

    assert_eq!(handle.function_table_size(), Some(1));
    assert!(handle.register_log_callback(capture(&sink)).await.unwrap());
    assert_eq!(handle.log_callback_slot(), Some(1));
    assert_eq!(handle.function_table_size(), Some(2));

    // A second registration changes nothing.
    assert!(!handle.register_log_callback(capture(&sink)).await.unwrap());
    assert_eq!(handle.function_table_size(), Some(2));

    translate_with(&mut handle, &TranslationRequest::new("hi", TABLE), &config)
        .await
        .unwrap();

    let captured = sink.lock().unwrap();
    assert_eq!(captured.as_slice(), &[(20000, "fake translation".to_string())]);
}

#[tokio::test]
async fn test_log_callback_unsupported_is_noop() {
    let config = ExecutionConfig::default();
    let fake = FakeEngine {
        log_callbacks: false,
        ..FakeEngine::default()
    };
    let mut handle = load(&fake, &config).await;

    let registered = handle
        .register_log_callback(capture(&Captured::default()))
        .await
        .unwrap();

    assert!(!registered);
    assert_eq!(handle.log_callback_slot(), None);
}
