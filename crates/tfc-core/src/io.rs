//! Policy-driven retry combinators shared by every read and write site.
//!
//! Short reads and writes are retried until the buffer is complete. What
//! happens on an actual error is decided by the session's [`ErrorAction`].

use std::io::{self, Read, Write};

use tracing::{error, warn};

use crate::error::{TfcError, TfcResult};
use crate::types::ErrorAction;

/// Result of [`read_full`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes now valid at the start of the buffer (including zero fill).
    pub filled: usize,
    /// The reader reported end of stream.
    pub eof: bool,
    /// Errors reported and tolerated under a non-fatal policy.
    pub errors: u32,
}

impl ReadOutcome {
    /// True when the buffer was filled only by real data, with no error.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// Read until `buf` is full, the reader hits EOF, or the policy stops us.
///
/// * `Exit` returns the first error.
/// * `Continue` logs the error and returns the short buffer as-is.
/// * `SyncPad` logs the error and zero-fills the remainder, reporting a full buffer.
pub fn read_full<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    action: ErrorAction,
    what: &str,
) -> TfcResult<ReadOutcome> {
    let mut out = ReadOutcome::default();
    while out.filled < buf.len() {
        match reader.read(&mut buf[out.filled..]) {
            Ok(0) => {
                out.eof = true;
                break;
            }
            Ok(n) => out.filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                match action {
                    ErrorAction::Exit => return Err(TfcError::io(what, e)),
                    ErrorAction::Continue => {
                        error!(source = %what, "{e}");
                    }
                    ErrorAction::SyncPad => {
                        error!(source = %what, "{e}");
                        buf[out.filled..].fill(0);
                        out.filled = buf.len();
                    }
                }
                out.errors += 1;
                break;
            }
        }
    }
    Ok(out)
}

/// Result of [`write_full`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub errors: u32,
}

/// Write all of `buf`, retrying partial writes.
///
/// Zero fill has no meaning for writes, so `SyncPad` behaves like
/// `Continue`: the error is logged and the rest of the buffer is dropped.
pub fn write_full<W: Write + ?Sized>(
    writer: &mut W,
    buf: &[u8],
    action: ErrorAction,
    what: &str,
) -> TfcResult<WriteOutcome> {
    let mut out = WriteOutcome::default();
    while out.written < buf.len() {
        let err = match writer.write(&buf[out.written..]) {
            Ok(0) => io::Error::new(io::ErrorKind::WriteZero, "failed to write whole buffer"),
            Ok(n) => {
                out.written += n;
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => e,
        };
        if action == ErrorAction::Exit {
            return Err(TfcError::io(what, err));
        }
        error!(destination = %what, "{err}");
        out.errors += 1;
        break;
    }
    Ok(out)
}

/// Read and discard exactly `n` bytes, for skipping forward in a pipe.
///
/// Returns the number of bytes actually skipped; fewer than `n` means EOF.
pub fn skip<R: Read + ?Sized>(
    reader: &mut R,
    n: u64,
    action: ErrorAction,
    what: &str,
) -> TfcResult<u64> {
    let mut scratch = vec![0u8; crate::DEFAULT_CHUNK_SIZE];
    let mut left = n;
    while left > 0 {
        let want = left.min(scratch.len() as u64) as usize;
        let got = read_full(reader, &mut scratch[..want], action, what)?;
        left -= got.filled as u64;
        if got.eof || got.filled < want {
            warn!(source = %what, skipped = n - left, requested = n, "short skip");
            break;
        }
    }
    Ok(n - left)
}
