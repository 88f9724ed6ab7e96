//! The chunked copy loop shared by every stream operation.
//!
//! Each iteration reads one chunk (retrying short reads), hands it to a
//! [`ChunkProcessor`], and writes what the processor produced. Totals are
//! published to a [`Progress`] as they change, so they stay exact on the
//! error-tolerant paths too.

use std::io::Read;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use tfc_core::io::{read_full, write_full};
use tfc_core::types::ErrorAction;
use tfc_core::{TfcError, TfcResult, BLOCK_SIZE};

use crate::endpoint::Output;
use crate::progress::{Progress, StatusReporter};

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Rounded up to a whole number of cipher blocks.
    pub chunk_size: usize,
    /// Stop after reading this many bytes; `None` reads to EOF.
    pub max_bytes: Option<u64>,
    pub error_action: ErrorAction,
    /// Zero-pad a chunk that ends mid-block and write the padded length.
    pub pad_to_block: bool,
    /// Sync the destination after every write.
    pub fsync: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: tfc_core::DEFAULT_CHUNK_SIZE,
            max_bytes: None,
            error_action: ErrorAction::Exit,
            pad_to_block: false,
            fsync: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Errors tolerated under `Continue` or `SyncPad`.
    pub soft_errors: u32,
    /// The loop stopped because cancellation was requested.
    pub cancelled: bool,
}

/// Whether a processed chunk goes to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Write,
    Discard,
}

/// Per-chunk work: `output` has the same length as `input`.
pub trait ChunkProcessor {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> TfcResult<Emit>;
}

impl<F> ChunkProcessor for F
where
    F: FnMut(&[u8], &mut [u8]) -> TfcResult<Emit>,
{
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> TfcResult<Emit> {
        self(input, output)
    }
}

/// Copies input to output unchanged.
pub struct Passthrough;

impl ChunkProcessor for Passthrough {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> TfcResult<Emit> {
        output.copy_from_slice(input);
        Ok(Emit::Write)
    }
}

/// Consecutive errored reads that yield no data before the loop stops.
const MAX_FAILED_READS: u32 = 64;

fn round_up(n: usize) -> usize {
    n.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Run the loop until EOF, `max_bytes`, a fatal error or cancellation.
pub fn transfer<R, W, P>(
    source: &mut R,
    destination: &mut W,
    processor: &mut P,
    opts: &TransferOptions,
    cancel: &CancellationToken,
    progress: &Progress,
    mut status: Option<&mut StatusReporter>,
) -> TfcResult<TransferReport>
where
    R: Read + ?Sized,
    W: Output + ?Sized,
    P: ChunkProcessor + ?Sized,
{
    if opts.chunk_size == 0 {
        return Err(TfcError::config("chunk size must be positive"));
    }
    // Whole blocks per chunk: only the final chunk may end mid-block.
    let chunk = round_up(opts.chunk_size);
    let mut input = Zeroizing::new(vec![0u8; chunk]);
    let mut output = Zeroizing::new(vec![0u8; chunk]);
    let mut report = TransferReport::default();
    let mut failed_reads = 0u32;

    loop {
        if cancel.is_cancelled() {
            info!(read = report.bytes_read, "transfer interrupted");
            report.cancelled = true;
            break;
        }
        if let Some(s) = status.as_deref_mut() {
            s.poll(progress);
        }

        let want = match opts.max_bytes {
            Some(max) => (max - report.bytes_read).min(chunk as u64) as usize,
            None => chunk,
        };
        if want == 0 {
            debug!(max = ?opts.max_bytes, "byte limit reached");
            break;
        }

        let got = read_full(source, &mut input[..want], opts.error_action, "source")?;
        report.soft_errors += got.errors;
        report.bytes_read += got.filled as u64;
        progress.add_read(got.filled as u64);
        if got.filled == 0 {
            if got.eof || got.errors == 0 {
                break;
            }
            failed_reads += 1;
            if failed_reads >= MAX_FAILED_READS {
                warn!(attempts = failed_reads, "source keeps failing, giving up");
                break;
            }
            continue;
        }
        failed_reads = 0;

        let mut len = got.filled;
        if opts.pad_to_block && len % BLOCK_SIZE != 0 {
            let padded = round_up(len);
            input[len..padded].fill(0);
            debug!(from = len, to = padded, "padded final block");
            len = padded;
        }

        if processor.process(&input[..len], &mut output[..len])? == Emit::Write {
            let put = write_full(destination, &output[..len], opts.error_action, "destination")?;
            report.soft_errors += put.errors;
            report.bytes_written += put.written as u64;
            progress.add_written(put.written as u64);
            if opts.fsync {
                destination
                    .sync()
                    .map_err(|e| TfcError::io("syncing destination", e))?;
            }
        }

        if got.eof {
            break;
        }
    }

    if let Some(s) = status {
        s.finish(progress);
    }
    Ok(report)
}
