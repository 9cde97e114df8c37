//! Wide-character codec for the engine's `widechar` type.
//!
//! liblouis is built with either 16-bit or 32-bit `widechar`. The width is
//! reported by `lou_charSize` and decides the encoding used for every
//! buffer passed across the boundary:
//! - 2 bytes: UTF-16, little endian (non-BMP text uses surrogate pairs)
//! - 4 bytes: UTF-32, little endian
//!
//! WebAssembly linear memory is little endian regardless of the host.

use louis_worker_common::{EngineError, MarshalError};

/// Width of one engine wide-character unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitWidth {
    /// 16-bit `widechar`.
    Two,
    /// 32-bit `widechar`.
    Four,
}

impl UnitWidth {
    /// Map the value returned by `lou_charSize`.
    pub fn from_char_size(size: i32) -> Result<Self, EngineError> {
        match size {
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            other => Err(EngineError::UnsupportedCharSize { size: other }),
        }
    }

    /// Size of one unit in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Four => 4,
        }
    }
}

/// Text encoded as engine units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    /// Encoded bytes including the NUL terminator.
    pub bytes: Vec<u8>,
    /// Number of units, excluding the terminator.
    pub units: usize,
}

/// Encode `text` as NUL-terminated engine units.
///
/// Interior NUL characters are rejected because the engine would stop
/// reading at them.
pub fn encode(text: &str, width: UnitWidth) -> Result<EncodedText, MarshalError> {
    if text.contains('\0') {
        return Err(MarshalError::InvalidInput {
            reason: "text contains a NUL character".into(),
        });
    }

    let mut bytes = Vec::with_capacity((text.len() + 1) * width.bytes());
    let units = match width {
        UnitWidth::Two => {
            let mut units = 0;
            for unit in text.encode_utf16() {
                bytes.extend_from_slice(&unit.to_le_bytes());
                units += 1;
            }
            bytes.extend_from_slice(&0u16.to_le_bytes());
            units
        }
        UnitWidth::Four => {
            let mut units = 0;
            for ch in text.chars() {
                bytes.extend_from_slice(&u32::from(ch).to_le_bytes());
                units += 1;
            }
            bytes.extend_from_slice(&0u32.to_le_bytes());
            units
        }
    };

    Ok(EncodedText { bytes, units })
}

/// Decode `units` engine units from `bytes`.
///
/// Decoding stops early at a NUL unit.
pub fn decode(bytes: &[u8], units: usize, width: UnitWidth) -> Result<String, MarshalError> {
    let needed = units * width.bytes();
    let Some(bytes) = bytes.get(..needed) else {
        return Err(MarshalError::invalid_output(format!(
            "expected {needed} bytes of output, got {}",
            bytes.len()
        )));
    };

    match width {
        UnitWidth::Two => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            String::from_utf16(&units)
                .map_err(|e| MarshalError::invalid_output(format!("invalid UTF-16 output: {e}")))
        }
        UnitWidth::Four => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .take_while(|&u| u != 0)
            .map(|u| {
                char::from_u32(u).ok_or_else(|| {
                    MarshalError::invalid_output(format!("invalid code point {u:#x} in output"))
                })
            })
            .collect(),
    }
}

/// Encode `s` as a NUL-terminated C string.
pub fn c_string(s: &str) -> Result<Vec<u8>, MarshalError> {
    if s.contains('\0') {
        return Err(MarshalError::InvalidInput {
            reason: "table list contains a NUL character".into(),
        });
    }
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    Ok(bytes)
}
