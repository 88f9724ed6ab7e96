//! Base64 text streams.
//!
//! Encoding wraps output at 76 columns. Decoding ignores whitespace and
//! accepts unpadded input. Both run through the ordinary transfer loop with
//! the codec sitting in front of the destination, so error policy, fsync,
//! cancellation and status work as for any other copy.

use std::io::{self, Read, Write};
use std::time::SystemTime;

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tfc_core::types::{Direction, ErrorAction};
use tfc_core::{TfcError, TfcResult};

use crate::endpoint::Output;
use crate::progress::{Progress, StatusReporter};
use crate::transfer::{transfer, Passthrough, TransferOptions, TransferReport};

/// Input bytes per encoded line (76 columns).
const LINE_BYTES: usize = 57;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Destination adapter: buffers what the loop writes and passes on the
/// encoded or decoded form.
struct Armor<'w, W: Output + ?Sized> {
    inner: &'w mut W,
    direction: Direction,
    pending: Vec<u8>,
    emitted: u64,
}

impl<'w, W: Output + ?Sized> Armor<'w, W> {
    fn new(inner: &'w mut W, direction: Direction) -> Self {
        Self {
            inner,
            direction,
            pending: Vec::new(),
            emitted: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.emitted += bytes.len() as u64;
        Ok(())
    }

    fn encode_lines(&mut self, last: bool) -> io::Result<()> {
        let whole = if last {
            self.pending.len()
        } else {
            self.pending.len() / LINE_BYTES * LINE_BYTES
        };
        if whole == 0 {
            return Ok(());
        }
        let mut text = Vec::with_capacity(whole / LINE_BYTES * 77 + 78);
        for line in self.pending[..whole].chunks(LINE_BYTES) {
            text.extend_from_slice(STANDARD.encode(line).as_bytes());
            text.push(b'\n');
        }
        self.pending.drain(..whole);
        self.put(&text)
    }

    fn decode_groups(&mut self, last: bool) -> io::Result<()> {
        let whole = if last {
            self.pending.len()
        } else {
            self.pending.len() / 4 * 4
        };
        if whole == 0 {
            return Ok(());
        }
        let decoded = LENIENT.decode(&self.pending[..whole]);
        // Bad input is dropped so a tolerant policy can carry on after it.
        self.pending.drain(..whole);
        let bytes = decoded.map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid base64 input: {e}"))
        })?;
        self.put(&bytes)
    }

    fn finish(&mut self) -> io::Result<()> {
        match self.direction {
            Direction::Encrypt => self.encode_lines(true)?,
            Direction::Decrypt => self.decode_groups(true)?,
        }
        self.inner.flush()
    }
}

impl<W: Output + ?Sized> Write for Armor<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.direction {
            Direction::Encrypt => {
                self.pending.extend_from_slice(buf);
                self.encode_lines(false)?;
            }
            Direction::Decrypt => {
                self.pending
                    .extend(buf.iter().copied().filter(|b| !b.is_ascii_whitespace()));
                self.decode_groups(false)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Output + ?Sized> Output for Armor<'_, W> {
    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }

    fn set_modified(&mut self, time: SystemTime) -> io::Result<()> {
        self.inner.set_modified(time)
    }
}

/// Base64-encode (`Encrypt`) or decode (`Decrypt`) `source` into `destination`.
///
/// `bytes_written` in the report counts what reached `destination`; the
/// shared [`Progress`] counts bytes fed to the codec.
pub fn base64_stream<R, W>(
    source: &mut R,
    destination: &mut W,
    direction: Direction,
    opts: &TransferOptions,
    cancel: &CancellationToken,
    progress: &Progress,
    status: Option<&mut StatusReporter>,
) -> TfcResult<TransferReport>
where
    R: Read + ?Sized,
    W: Output + ?Sized,
{
    let opts = TransferOptions {
        pad_to_block: false,
        ..opts.clone()
    };
    let mut armor = Armor::new(destination, direction);
    let mut report = transfer(
        source,
        &mut armor,
        &mut Passthrough,
        &opts,
        cancel,
        progress,
        status,
    )?;
    if report.cancelled {
        warn!("interrupted, base64 tail not written");
    } else if let Err(e) = armor.finish() {
        if opts.error_action == ErrorAction::Exit {
            return Err(TfcError::io("destination", e));
        }
        warn!("destination: {e}");
        report.soft_errors += 1;
    }
    report.bytes_written = armor.emitted;
    info!(
        read = report.bytes_read,
        written = report.bytes_written,
        ?direction,
        "base64 stream done"
    );
    Ok(report)
}
