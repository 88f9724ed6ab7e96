//! Running transfer totals and the status line built from them.
//!
//! Totals live in atomics so a signal task or progress bar on another thread
//! can read them while the transfer runs. The status reporter is polled by
//! the transfer loop between chunks; it never runs inside a transform.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tfc_core::size::{describe_scale, human_bytes};
use tfc_core::types::SizeUnits;

#[derive(Debug, Default)]
pub struct Progress {
    read: AtomicU64,
    written: AtomicU64,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_written(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

/// Out-of-band requests from signal handlers.
#[derive(Debug, Default)]
pub struct StatusControl {
    requested: AtomicBool,
    short: AtomicBool,
}

impl StatusControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask for one report at the next opportunity.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Switch between the long and short status formats.
    pub fn toggle_format(&self) {
        self.short.fetch_xor(true, Ordering::Relaxed);
    }

    fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::Relaxed)
    }

    fn is_short(&self) -> bool {
        self.short.load(Ordering::Relaxed)
    }
}

pub type StatusSink = Box<dyn FnMut(&str) + Send>;

/// Formats status lines on request or on a fixed interval.
pub struct StatusReporter {
    control: Arc<StatusControl>,
    interval: Option<Duration>,
    units: SizeUnits,
    verb: &'static str,
    sink: StatusSink,
    last: Instant,
    last_written: u64,
}

impl StatusReporter {
    pub fn new(
        control: Arc<StatusControl>,
        interval: Option<Duration>,
        units: SizeUnits,
        sink: StatusSink,
    ) -> Self {
        Self {
            control,
            interval,
            units,
            verb: "written",
            sink,
            last: Instant::now(),
            last_written: 0,
        }
    }

    /// Word used for the destination total: `encrypted`, `decrypted`, `written`.
    pub fn set_verb(&mut self, verb: &'static str) {
        self.verb = verb;
    }

    /// Emit a line if one was requested or the interval has elapsed.
    pub fn poll(&mut self, progress: &Progress) {
        let due = self
            .interval
            .is_some_and(|i| self.last.elapsed() >= i);
        if self.control.take_request() || due {
            self.emit(progress);
        }
    }

    /// Emit the closing line if periodic reporting was on.
    pub fn finish(&mut self, progress: &Progress) {
        if self.interval.is_some() {
            self.emit(progress);
        }
    }

    fn emit(&mut self, progress: &Progress) {
        let line = self.line(progress);
        (self.sink)(&line);
        self.last = Instant::now();
        self.last_written = progress.bytes_written();
    }

    fn line(&self, progress: &Progress) -> String {
        let secs = self.last.elapsed().as_secs_f64().max(1e-6);
        let written = progress.bytes_written();
        let speed = (written.saturating_sub(self.last_written) as f64 / secs) as u64;
        let (sv, ss) = describe_scale(speed, self.units);
        if self.control.is_short() {
            let (wv, ws) = describe_scale(written, self.units);
            format!("{} {wv:.2}{ws}, {sv:.2}{ss} B/s", self.verb)
        } else {
            format!(
                "read: {}, {} {} bytes, ({speed} ({sv:.2}{ss}) B/s)",
                human_bytes(progress.bytes_read(), self.units),
                self.verb,
                human_bytes(written, self.units),
            )
        }
    }
}
