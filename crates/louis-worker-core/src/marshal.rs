//! Moving text in and out of the engine's linear memory.
//!
//! Every translation allocates four scratch buffers in guest memory: the
//! table list, the input text, the output buffer, and a pair of `int`
//! length cells. They belong to a [`ScratchArena`] that releases them
//! whether the call succeeds, fails, or traps.
//!
//! Freeing guest memory is itself a guest call and therefore async, so the
//! arena is released explicitly with [`ScratchArena::release`]. An arena
//! dropped without being released hands its allocations to the handle,
//! which frees them before the next translation.

use std::time::Instant;

use tracing::{debug, instrument, warn};

use louis_worker_common::{EngineError, ExecutionConfig, MarshalError};

use crate::handle::{EngineHandle, TranslateArgs};
use crate::widechar::{self, EncodedText, UnitWidth};

/// One text translation to run against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    /// Text to translate.
    pub text: String,
    /// Comma-separated list of installed tables.
    pub table_list: String,
    /// Raw engine mode bits.
    pub mode: u32,
}

impl TranslationRequest {
    /// Create a request with no mode bits set.
    pub fn new(text: impl Into<String>, table_list: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            table_list: table_list.into(),
            mode: 0,
        }
    }

    /// Set the engine mode bits.
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

/// Output of a successful translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranslationResult {
    /// Braille in BRF ASCII.
    pub braille: String,
    /// Input units the engine consumed.
    pub input_units: usize,
    /// Output units the engine wrote.
    pub output_units: usize,
}

/// A buffer in the engine's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBuffer {
    /// Guest address.
    pub address: u32,
    /// Size in bytes.
    pub byte_len: usize,
    /// Unit width for text buffers; `None` for raw bytes.
    pub unit_width: Option<UnitWidth>,
}

impl ScratchBuffer {
    /// Capacity in units for text buffers.
    pub fn units(&self) -> Option<usize> {
        self.unit_width.map(|w| self.byte_len / w.bytes())
    }
}

/// Scoped owner of every scratch allocation made for one call.
pub struct ScratchArena<'h> {
    handle: &'h mut EngineHandle,
    live: Vec<u32>,
}

impl<'h> ScratchArena<'h> {
    /// Open an arena over `handle`.
    pub fn new(handle: &'h mut EngineHandle) -> Self {
        Self {
            handle,
            live: Vec::new(),
        }
    }

    /// Allocate `byte_len` raw bytes.
    pub async fn alloc_bytes(&mut self, byte_len: usize) -> Result<ScratchBuffer, MarshalError> {
        let address = self.handle.malloc(byte_len).await?;
        self.live.push(address);
        Ok(ScratchBuffer {
            address,
            byte_len,
            unit_width: None,
        })
    }

    /// Allocate room for `units` units of the engine's width.
    pub async fn alloc_units(&mut self, units: usize) -> Result<ScratchBuffer, MarshalError> {
        let width = self.handle.unit_width();
        let byte_len = units
            .checked_mul(width.bytes())
            .ok_or_else(|| MarshalError::overflow(format!("{units} units do not fit in memory")))?;
        let mut buffer = self.alloc_bytes(byte_len).await?;
        buffer.unit_width = Some(width);
        Ok(buffer)
    }

    /// The handle the arena allocates from.
    pub fn handle(&mut self) -> &mut EngineHandle {
        self.handle
    }

    /// Number of allocations not yet released.
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Free every allocation, newest first.
    ///
    /// If a free fails, the remaining allocations are deferred to the
    /// handle and the first error is returned.
    pub async fn release(mut self) -> Result<(), EngineError> {
        while let Some(address) = self.live.pop() {
            if let Err(e) = self.handle.free(address).await {
                self.live.push(address);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Drop for ScratchArena<'_> {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            debug!(count = self.live.len(), "Deferring scratch allocations");
            self.handle.defer_free(self.live.drain(..));
        }
    }
}

/// Translate `request.text` with the engine behind `handle`.
///
/// Empty input yields an empty result without calling the engine.
///
/// # Errors
///
/// - [`MarshalError::EncodingOverflow`] if the input exceeds
///   `max_input_units` or the engine stopped before consuming all of it
/// - [`MarshalError::InvalidOutput`] if the reported lengths are out of
///   range or the output does not decode
/// - [`MarshalError::TranslationFailed`] if the engine rejected the call
/// - [`MarshalError::Engine`] if the engine trapped
#[instrument(skip_all, fields(tables = %request.table_list, chars = request.text.len()))]
pub async fn translate_with(
    handle: &mut EngineHandle,
    request: &TranslationRequest,
    config: &ExecutionConfig,
) -> Result<TranslationResult, MarshalError> {
    handle.collect_deferred().await;

    let input = widechar::encode(&request.text, handle.unit_width())?;
    if input.units == 0 {
        return Ok(TranslationResult::default());
    }
    if input.units > config.max_input_units as usize {
        return Err(MarshalError::overflow(format!(
            "input of {} units exceeds the limit of {}",
            input.units, config.max_input_units
        )));
    }
    let capacity = config.output_capacity(input.units).ok_or_else(|| {
        MarshalError::overflow(format!("no output capacity for {} units", input.units))
    })?;
    let table_list = widechar::c_string(&request.table_list)?;

    let start = Instant::now();
    let mut arena = ScratchArena::new(handle);
    let outcome = run(&mut arena, &input, &table_list, capacity, request).await;
    let released = arena.release().await;

    let result = match (outcome, released) {
        (Ok(result), Ok(())) => result,
        (Ok(_), Err(e)) => return Err(e.into()),
        (Err(e), released) => {
            if let Err(free_error) = released {
                warn!(error = %free_error, "Scratch release failed after translation error");
            }
            return Err(e);
        }
    };

    debug!(
        input_units = result.input_units,
        output_units = result.output_units,
        duration_us = start.elapsed().as_micros(),
        "Translation complete"
    );
    Ok(result)
}

async fn run(
    arena: &mut ScratchArena<'_>,
    input: &EncodedText,
    table_list: &[u8],
    capacity: usize,
    request: &TranslationRequest,
) -> Result<TranslationResult, MarshalError> {
    let in_units = to_guest_len(input.units)?;
    let out_capacity = to_guest_len(capacity)?;

    let tables = arena.alloc_bytes(table_list.len()).await?;
    let inbuf = arena.alloc_units(input.units + 1).await?;
    let outbuf = arena.alloc_units(capacity).await?;
    let lengths = arena.alloc_bytes(8).await?;
    let in_len = lengths.address;
    let out_len = lengths.address + 4;

    let handle = arena.handle();
    let width = handle.unit_width();
    handle.write_bytes(tables.address, table_list)?;
    handle.write_bytes(inbuf.address, &input.bytes)?;
    handle.write_i32(in_len, in_units)?;
    handle.write_i32(out_len, out_capacity)?;

    let ret = handle
        .translate(TranslateArgs {
            table_list: tables.address,
            input: inbuf.address,
            input_len: in_len,
            output: outbuf.address,
            output_len: out_len,
            mode: request.mode,
        })
        .await?;

    let consumed = handle.read_i32(in_len)?;
    let written = handle.read_i32(out_len)?;

    // A zero return is only a failure when the lengths show no progress.
    let untouched = consumed == in_units && written == out_capacity;
    if ret == 0 && (consumed == 0 || untouched) {
        return Err(MarshalError::TranslationFailed {
            tables: request.table_list.clone(),
        });
    }

    let written = usize::try_from(written)
        .ok()
        .filter(|&w| w <= capacity)
        .ok_or_else(|| {
            MarshalError::invalid_output(format!(
                "engine reported {written} output units for a capacity of {capacity}"
            ))
        })?;
    let consumed = usize::try_from(consumed)
        .ok()
        .filter(|&c| c <= input.units)
        .ok_or_else(|| {
            MarshalError::invalid_output(format!(
                "engine reported {consumed} input units consumed of {}",
                input.units
            ))
        })?;
    if consumed < input.units {
        return Err(MarshalError::overflow(format!(
            "output capacity of {capacity} units exhausted after {consumed} of {} input units",
            input.units
        )));
    }

    let bytes = handle.read_bytes(outbuf.address, written * width.bytes())?;
    let braille = widechar::decode(&bytes, written, width)?;

    Ok(TranslationResult {
        braille,
        input_units: consumed,
        output_units: written,
    })
}

fn to_guest_len(units: usize) -> Result<i32, MarshalError> {
    i32::try_from(units)
        .map_err(|_| MarshalError::overflow(format!("{units} units exceed the engine's int range")))
}
