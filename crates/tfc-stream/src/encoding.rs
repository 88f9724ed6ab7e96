//! Text forms of digests and counters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use tfc_core::types::BinaryFormat;

pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.bytes().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Render bytes for display; `Raw` passes them through.
pub fn render(bytes: &[u8], format: BinaryFormat) -> Vec<u8> {
    match format {
        BinaryFormat::Hex => to_hex(bytes).into_bytes(),
        BinaryFormat::Base64 => STANDARD.encode(bytes).into_bytes(),
        BinaryFormat::Raw => bytes.to_vec(),
    }
}

/// Parse a digest written as hex or base64, whichever fits.
pub fn parse_digest(text: &str) -> Option<Vec<u8>> {
    from_hex(text).or_else(|| STANDARD.decode(text).ok())
}
