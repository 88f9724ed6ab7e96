//! Skein checksums of whole streams, and checking them against a list.

use std::io::{BufRead, Read, Write};

use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use tfc_core::config::check_bits;
use tfc_core::types::{BinaryFormat, ErrorAction};
use tfc_core::{TfcError, TfcResult};
use tfc_crypto::kdf::hash_reader;
use tfc_crypto::skein::{MacKey, Skein};

use crate::encoding::{parse_digest, render};

#[derive(Debug, Clone)]
pub struct SumOptions {
    pub bits: u32,
    pub format: BinaryFormat,
    /// Hash at most this many bytes of each input.
    pub limit: Option<u64>,
    pub error_action: ErrorAction,
}

impl Default for SumOptions {
    fn default() -> Self {
        Self {
            bits: tfc_core::MAX_BITS,
            format: BinaryFormat::Hex,
            limit: None,
            error_action: ErrorAction::Exit,
        }
    }
}

/// Hash one input.
pub fn hash_stream<R: Read + ?Sized>(
    reader: &mut R,
    opts: &SumOptions,
    key: Option<&MacKey>,
    name: &str,
) -> TfcResult<Zeroizing<Vec<u8>>> {
    check_bits(opts.bits, "bits")?;
    let hasher = Skein::new(opts.bits, key)?;
    hash_reader(reader, hasher, opts.limit, opts.error_action, name)
}

/// One output record: `HASH  name\n`, or the bare digest in raw form.
pub fn format_line(digest: &[u8], name: &str, format: BinaryFormat) -> Vec<u8> {
    let mut line = render(digest, format);
    if format != BinaryFormat::Raw {
        line.extend_from_slice(b"  ");
        line.extend_from_slice(name.as_bytes());
        line.push(b'\n');
    }
    line
}

/// Hash `reader` and write its record to `out`.
pub fn sum_one<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    name: &str,
    opts: &SumOptions,
    key: Option<&MacKey>,
    out: &mut W,
) -> TfcResult<()> {
    let digest = hash_stream(reader, opts, key, name)?;
    out.write_all(&format_line(&digest, name, opts.format))
        .map_err(|e| TfcError::io("writing checksum", e))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub ok: usize,
    pub failed: usize,
}

impl CheckReport {
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Check every `HASH  name` line of `list`.
///
/// `open` resolves a name to a reader; an input that cannot be opened or
/// read counts as a failure rather than aborting the check.
pub fn check_list<L, F, W>(
    list: &mut L,
    mut open: F,
    opts: &SumOptions,
    key: Option<&MacKey>,
    out: &mut W,
) -> TfcResult<CheckReport>
where
    L: BufRead + ?Sized,
    F: FnMut(&str) -> TfcResult<Box<dyn Read>>,
    W: Write + ?Sized,
{
    let mut report = CheckReport::default();
    for line in list.lines() {
        let line = line.map_err(|e| TfcError::io("reading check list", e))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((hash, name)) = line.split_once(char::is_whitespace) else {
            warn!(line, "malformed check line");
            report.failed += 1;
            continue;
        };
        let name = name.trim_start();

        let good = match parse_digest(hash) {
            Some(want) => match open(name).and_then(|mut r| hash_stream(&mut r, opts, key, name)) {
                Ok(got) => got.len() == want.len() && bool::from(got.ct_eq(&want)),
                Err(e) => {
                    warn!(file = name, "{e}");
                    false
                }
            },
            None => false,
        };
        let verdict = if good { "OK" } else { "FAILED" };
        writeln!(out, "{name}: {verdict}").map_err(|e| TfcError::io("writing check result", e))?;
        if good {
            report.ok += 1;
        } else {
            report.failed += 1;
        }
    }
    if report.ok == 0 && report.failed > 0 {
        warn!(
            bits = opts.bits,
            "every check failed: wrong width or MAC key?"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn opts(bits: u32) -> SumOptions {
        SumOptions {
            bits,
            ..SumOptions::default()
        }
    }

    fn line_for(data: &[u8], name: &str, o: &SumOptions) -> String {
        let mut out = Vec::new();
        sum_one(&mut Cursor::new(data.to_vec()), name, o, None, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn hex_line_shape() {
        let line = line_for(b"abc", "abc.txt", &opts(256));
        let (hash, rest) = line.split_once("  ").unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(rest, "abc.txt\n");
    }

    #[test]
    fn limit_and_key_change_the_digest() {
        let data = vec![3u8; 4000];
        let full = hash_stream(&mut Cursor::new(data.clone()), &opts(512), None, "x").unwrap();
        let limited = SumOptions {
            limit: Some(10),
            ..opts(512)
        };
        let part = hash_stream(&mut Cursor::new(data.clone()), &limited, None, "x").unwrap();
        let prefix = hash_stream(&mut Cursor::new(data[..10].to_vec()), &opts(512), None, "x").unwrap();
        assert_ne!(full, part);
        assert_eq!(part, prefix);

        let key = MacKey::from_bytes(b"k");
        let keyed = hash_stream(&mut Cursor::new(data), &opts(512), Some(&key), "x").unwrap();
        assert_ne!(keyed, full);
    }

    #[test]
    fn bad_width_rejected() {
        assert!(hash_stream(&mut Cursor::new(vec![]), &opts(12), None, "x").is_err());
    }

    #[test]
    fn check_reports_each_file() {
        let files: HashMap<&str, Vec<u8>> =
            [("a", b"alpha".to_vec()), ("b", b"beta".to_vec())].into_iter().collect();
        let hex = opts(256);
        let b64 = SumOptions {
            format: BinaryFormat::Base64,
            ..opts(256)
        };
        let mut list = line_for(b"alpha", "a", &hex);
        list.push_str(&line_for(b"BETA", "b", &b64));
        list.push_str(&line_for(b"x", "missing", &hex));

        let mut out = Vec::new();
        let report = check_list(
            &mut Cursor::new(list.into_bytes()),
            |name: &str| -> TfcResult<Box<dyn Read>> {
                files
                    .get(name)
                    .map(|d| Box::new(Cursor::new(d.clone())) as Box<dyn Read>)
                    .ok_or_else(|| TfcError::config(format!("{name}: no such file")))
            },
            &hex,
            None,
            &mut out,
        )
        .unwrap();
        assert_eq!(report, CheckReport { ok: 1, failed: 2 });
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a: OK\nb: FAILED\nmissing: FAILED\n"
        );
    }
}
