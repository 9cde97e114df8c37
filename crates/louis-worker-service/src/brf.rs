//! Braille Ready Format helpers.
//!
//! BRF writes each six-dot cell as one ASCII character. The position of a
//! character in [`BRF_CELLS`] is the cell's dot pattern, which is also its
//! offset from U+2800 in the Unicode braille block.

/// First code point of the Unicode braille patterns block.
const BRAILLE_BASE: u32 = 0x2800;

/// BRF characters indexed by dot pattern (dot 1 = bit 0 ... dot 6 = bit 5).
pub const BRF_CELLS: &[u8; 64] =
    b" A1B'K2L@CIF/MSP\"E3H9O6R^DJG>NTQ,*5<-U8V.%[$+X!&;:4\\0Z7(_?W]#Y)=";

/// Dot pattern of a BRF character, if it is one.
///
/// Lowercase letters are accepted as their uppercase cells.
pub fn cell(c: char) -> Option<u8> {
    if !c.is_ascii() {
        return None;
    }
    let upper = c.to_ascii_uppercase() as u8;
    BRF_CELLS
        .iter()
        .position(|&b| b == upper)
        .and_then(|i| u8::try_from(i).ok())
}

/// Render BRF text as Unicode braille.
///
/// Characters outside BRF, such as newlines and form feeds, are kept.
pub fn brf_to_unicode(brf: &str) -> String {
    brf.chars()
        .map(|c| {
            cell(c)
                .and_then(|dots| char::from_u32(BRAILLE_BASE + u32::from(dots)))
                .unwrap_or(c)
        })
        .collect()
}

/// Render six-dot Unicode braille as BRF.
///
/// Eight-dot patterns and other characters are kept.
pub fn unicode_to_brf(text: &str) -> String {
    text.chars()
        .map(|c| match (c as u32).checked_sub(BRAILLE_BASE) {
            Some(dots) if dots < 64 => char::from(BRF_CELLS[dots as usize]),
            _ => c,
        })
        .collect()
}

/// Whether every character is a BRF cell or line/page layout.
pub fn is_brf(text: &str) -> bool {
    text.chars()
        .all(|c| matches!(c, '\n' | '\r' | '\x0c') || cell(c).is_some())
}
