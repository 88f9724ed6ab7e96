//! In-process cipher benchmark.
//!
//! Encrypts (or decrypts) one 64 KiB block over and over with a random key
//! until the time runs out or the run is cancelled. Nothing touches disk, so
//! the figure is the cipher's own throughput on this machine.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

use tfc_core::size::describe_scale;
use tfc_core::types::{Direction, Mode, SizeUnits};
use tfc_core::{TfcResult, DEFAULT_CHUNK_SIZE};
use tfc_crypto::{fill_random, random_engine, Skein};

use crate::progress::{Progress, StatusReporter};

#[derive(Debug, Clone)]
pub struct BenchOptions {
    /// `Plain` measures CTR.
    pub mode: Mode,
    pub direction: Direction,
    /// Also run every block through an unkeyed Skein MAC of this width.
    pub mac_bits: Option<u32>,
    pub duration: Duration,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Ctr,
            direction: Direction::Encrypt,
            mac_bits: None,
            duration: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchReport {
    pub bytes: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl BenchReport {
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes as f64 / secs) as u64
    }

    /// `processed 1048576 (1.00M) bytes, avg. speed 524288 (512.00K) B/s, time 2000000us.`
    pub fn summary(&self, units: SizeUnits) -> String {
        let (bv, bs) = describe_scale(self.bytes, units);
        let speed = self.bytes_per_sec();
        let (sv, ss) = describe_scale(speed, units);
        format!(
            "processed {} ({bv:.2}{bs}) bytes, avg. speed {speed} ({sv:.2}{ss}) B/s, time {}us.",
            self.bytes,
            self.elapsed.as_micros()
        )
    }
}

pub fn benchmark(
    opts: &BenchOptions,
    cancel: &CancellationToken,
    progress: &Progress,
    mut status: Option<&mut StatusReporter>,
) -> TfcResult<BenchReport> {
    let mode = match opts.mode {
        Mode::Plain => Mode::Ctr,
        m => m,
    };
    let mut engine = random_engine(mode)?;
    let mut mac = opts.mac_bits.map(|bits| Skein::new(bits, None)).transpose()?;
    let mut block = Zeroizing::new(vec![0u8; DEFAULT_CHUNK_SIZE]);
    fill_random(&mut block)?;
    info!(?mode, direction = ?opts.direction, mac_bits = ?opts.mac_bits, seconds = opts.duration.as_secs_f64(), "benchmark started");

    let start = Instant::now();
    let mut bytes = 0u64;
    let mut cancelled = false;
    while start.elapsed() < opts.duration {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if let Some(s) = status.as_deref_mut() {
            s.poll(progress);
        }
        if let Some(m) = mac.as_mut() {
            m.update(&block);
        }
        engine.transform_in_place(opts.direction, &mut block)?;
        bytes += block.len() as u64;
        progress.add_read(block.len() as u64);
        progress.add_written(block.len() as u64);
    }
    let elapsed = start.elapsed();
    if let Some(m) = mac {
        debug!(tag_len = m.finalize().len(), "benchmark MAC finished");
    }
    if let Some(s) = status {
        s.finish(progress);
    }

    let report = BenchReport {
        bytes,
        elapsed,
        cancelled,
    };
    info!(
        bytes,
        micros = elapsed.as_micros() as u64,
        speed = report.bytes_per_sec(),
        "benchmark finished"
    );
    Ok(report)
}
