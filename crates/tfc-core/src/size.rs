//! Byte-count specifiers: `4096`, `4K`, `2e`, `cbs`, or a file name.

use std::fs::File;
use std::io::{Seek, SeekFrom};

use crate::error::{TfcError, TfcResult};
use crate::types::SizeUnits;

/// Values the unit suffixes and aliases resolve against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeContext {
    pub units: SizeUnits,
    pub block_size: u64,
    pub chunk_size: u64,
    pub key_bytes: u64,
}

impl Default for SizeContext {
    fn default() -> Self {
        Self {
            units: SizeUnits::Binary,
            block_size: crate::BLOCK_SIZE as u64,
            chunk_size: crate::DEFAULT_CHUNK_SIZE as u64,
            key_bytes: crate::KEY_SIZE as u64,
        }
    }
}

/// Parse a size specifier.
///
/// Anything that is neither a number with an optional suffix nor one of the
/// aliases `cbs`, `iobs`, `bits` is opened as a file and its length used.
pub fn parse_size(spec: &str, ctx: &SizeContext) -> TfcResult<u64> {
    if spec.is_empty() {
        return Err(TfcError::config("empty size specifier"));
    }
    if spec.eq_ignore_ascii_case("cbs") {
        return Ok(ctx.block_size);
    }
    if spec.eq_ignore_ascii_case("iobs") {
        return Ok(ctx.chunk_size);
    }
    if spec.eq_ignore_ascii_case("bits") {
        return Ok(ctx.key_bytes);
    }

    match parse_number(spec, ctx) {
        Some(v) => v.ok_or_else(|| TfcError::config(format!("{spec}: size overflows"))),
        None => file_size(spec),
    }
}

/// `None` when `spec` is not numeric at all; `Some(None)` on overflow.
fn parse_number(spec: &str, ctx: &SizeContext) -> Option<Option<u64>> {
    let (digits, suffix) = match spec.char_indices().last() {
        Some((i, c)) if !c.is_ascii_digit() => (&spec[..i], Some(c)),
        _ => (spec, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let k = ctx.units.kilo();
    let mult = match suffix {
        None | Some('B') | Some('c') => 1,
        Some('W') => 2,
        Some('I') => 4,
        Some('L') => 8,
        Some('e') => ctx.block_size,
        Some('E') => ctx.chunk_size,
        Some('b') | Some('s') => 512,
        Some('p') | Some('S') => 4096,
        Some('k') | Some('K') => k,
        Some('m') | Some('M') => k * k,
        Some('g') | Some('G') => k * k * k,
        Some('T') => k * k * k * k,
        Some('P') => k * k * k * k * k,
        Some(_) => return None,
    };
    let n: u64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return Some(None),
    };
    Some(n.checked_mul(mult))
}

fn file_size(path: &str) -> TfcResult<u64> {
    let mut f = File::open(path).map_err(|e| TfcError::io(path, e))?;
    f.seek(SeekFrom::End(0))
        .map_err(|e| TfcError::io(format!("{path}: not a seekable file"), e))
}

const SCALE: [&str; 6] = ["B", "K", "M", "G", "T", "P"];

/// Scale a byte count for display: `(1.50, "M")`.
pub fn describe_scale(bytes: u64, units: SizeUnits) -> (f64, &'static str) {
    let k = units.kilo() as f64;
    let mut v = bytes as f64;
    let mut idx = 0;
    while v >= k && idx < SCALE.len() - 1 {
        v /= k;
        idx += 1;
    }
    (v, SCALE[idx])
}

/// `"12345 (12.06K)"`.
pub fn human_bytes(bytes: u64, units: SizeUnits) -> String {
    let (v, s) = describe_scale(bytes, units);
    format!("{bytes} ({v:.2}{s})")
}
