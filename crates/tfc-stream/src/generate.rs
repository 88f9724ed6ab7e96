//! Random and zero stream generation.
//!
//! Random output is a randomly keyed engine encrypting zero blocks. In the
//! chaining modes a short final chunk is still run through the cipher as a
//! whole block and then cut to length.

use std::io::{self, Read};

use tokio_util::sync::CancellationToken;
use tracing::info;
use zeroize::Zeroizing;

use tfc_core::types::{Direction, Mode};
use tfc_core::{TfcResult, BLOCK_SIZE};
use tfc_crypto::mode::ModeEngine;
use tfc_crypto::random::random_engine;

use crate::endpoint::Output;
use crate::progress::{Progress, StatusReporter};
use crate::transfer::{transfer, ChunkProcessor, Emit, Passthrough, TransferOptions, TransferReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateKind {
    Random,
    Zero,
}

struct Keystream {
    engine: ModeEngine,
    scratch: Zeroizing<Vec<u8>>,
}

impl ChunkProcessor for Keystream {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> TfcResult<Emit> {
        let len = input.len();
        if self.engine.mode() == Mode::Ctr || len % BLOCK_SIZE == 0 {
            self.engine.transform(Direction::Encrypt, input, output)?;
            return Ok(Emit::Write);
        }
        let full = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        self.scratch.clear();
        self.scratch.resize(full, 0);
        self.scratch[..len].copy_from_slice(input);
        self.engine
            .transform_in_place(Direction::Encrypt, &mut self.scratch[..])?;
        output.copy_from_slice(&self.scratch[..len]);
        Ok(Emit::Write)
    }
}

/// Write `n_bytes` of generated data to `destination`.
///
/// `mode` selects the keystream construction for random output; `Plain`
/// falls back to CTR.
#[allow(clippy::too_many_arguments)]
pub fn generate<W: Output + ?Sized>(
    destination: &mut W,
    n_bytes: u64,
    kind: GenerateKind,
    mode: Mode,
    opts: &TransferOptions,
    cancel: &CancellationToken,
    progress: &Progress,
    status: Option<&mut StatusReporter>,
) -> TfcResult<TransferReport> {
    let mut source = io::repeat(0).take(n_bytes);
    let opts = TransferOptions {
        max_bytes: Some(n_bytes),
        pad_to_block: false,
        ..opts.clone()
    };
    info!(bytes = n_bytes, ?kind, "generating");
    match kind {
        GenerateKind::Zero => transfer(
            &mut source,
            destination,
            &mut Passthrough,
            &opts,
            cancel,
            progress,
            status,
        ),
        GenerateKind::Random => {
            let mode = if mode == Mode::Plain { Mode::Ctr } else { mode };
            let mut keystream = Keystream {
                engine: random_engine(mode)?,
                scratch: Zeroizing::new(Vec::with_capacity(BLOCK_SIZE)),
            };
            transfer(
                &mut source,
                destination,
                &mut keystream,
                &opts,
                cancel,
                progress,
                status,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(kind: GenerateKind, mode: Mode, n: u64, chunk: usize) -> (Vec<u8>, TransferReport) {
        let mut out = Vec::new();
        let report = generate(
            &mut out,
            n,
            kind,
            mode,
            &TransferOptions {
                chunk_size: chunk,
                ..TransferOptions::default()
            },
            &CancellationToken::new(),
            &Progress::default(),
            None,
        )
        .unwrap();
        (out, report)
    }

    #[test]
    fn zero_stream() {
        let (out, report) = gen(GenerateKind::Zero, Mode::Ctr, 1000, 256);
        assert_eq!(out, vec![0u8; 1000]);
        assert_eq!(report.bytes_written, 1000);
    }

    #[test]
    fn random_stream_has_exact_length_in_every_mode() {
        for mode in [Mode::Plain, Mode::Ctr, Mode::Tctr, Mode::Cbc] {
            let (out, report) = gen(GenerateKind::Random, mode, 333, 200);
            assert_eq!(out.len(), 333, "{mode}");
            assert_eq!(report.bytes_read, 333);
            assert!(out.iter().filter(|&&b| b == 0).count() < 50, "{mode}");
        }
    }

    #[test]
    fn random_streams_differ() {
        let (a, _) = gen(GenerateKind::Random, Mode::Tctr, 256, 4096);
        let (b, _) = gen(GenerateKind::Random, Mode::Tctr, 256, 4096);
        assert_ne!(a, b);
    }
}
