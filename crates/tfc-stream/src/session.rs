//! One encrypt, decrypt or plain-copy run, from key derivation to the
//! signature verdict.
//!
//! A [`Session`] owns every secret it derives (key, counter, MAC key); all of
//! them are zeroized when they go out of scope, on error paths as well.
//!
//! Order of work in [`Session::run`]:
//!
//! ```text
//! MAC key ─► tweak file ─► stream limits ─► counter ─► source seek ─► key
//!   ─► (key export) ─► engine + rewind ─► destination seek ─► counter head
//!   ─► transfer (sign ─► transform ─► verify) ─► signature ─► timestamps ─► sync
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use tfc_core::config::SessionConfig;
use tfc_core::io::{read_full, skip, write_full};
use tfc_core::types::{
    BinaryFormat, CounterSource, Direction, ErrorAction, KeySource, MacKeySource, MacLocation,
    MacPolicy, Mode, TweakSource,
};
use tfc_core::{TfcError, TfcResult, TWEAK_SIZE};
use tfc_crypto::kdf::{self, DerivedKey, PasswordPrompt, DEFAULT_TWEAK};
use tfc_crypto::mac::{decode_signature, encode_signature, Authenticator, Verdict};
use tfc_crypto::mode::ModeEngine;
use tfc_crypto::random::random_counter;
use tfc_crypto::skein::MacKey;

use crate::encoding::render;
use crate::endpoint::{Input, Output};
use crate::progress::{Progress, StatusReporter};
use crate::transfer::{transfer, ChunkProcessor, Emit, TransferOptions, TransferReport};

/// Auxiliary streams a run may need besides source and destination.
///
/// Which ones must be present follows from the configuration: a raw key or
/// keyfile needs `key`, a counter file needs `counter`, and so on.
#[derive(Default)]
pub struct Endpoints<'a> {
    /// Raw key bytes or keyfile contents.
    pub key: Option<&'a mut dyn Read>,
    pub tweak: Option<&'a mut dyn Read>,
    pub counter: Option<&'a mut dyn Read>,
    pub mac_key: Option<&'a mut dyn Read>,
    /// Detached signature to verify.
    pub signature_in: Option<&'a mut dyn Read>,
    /// Detached signature to write.
    pub signature_out: Option<&'a mut dyn Output>,
    /// When present, the derived key is written here and nothing else runs.
    pub key_out: Option<&'a mut dyn Output>,
}

fn required<'s, T: ?Sized>(slot: &'s mut Option<&mut T>, what: &str) -> TfcResult<&'s mut T> {
    slot.as_deref_mut()
        .ok_or_else(|| TfcError::config(format!("no {what} stream supplied")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    pub report: TransferReport,
    /// Set when a signature was checked.
    pub verdict: Option<Verdict>,
    pub soft_errors: u32,
    pub cancelled: bool,
    pub key_exported: bool,
}

impl SessionOutcome {
    /// `1` for a failed or short signature, tolerated errors, or an
    /// interrupted run; `0` otherwise.
    pub fn exit_code(&self) -> i32 {
        let bad_mac = self.verdict.is_some_and(|v| !v.is_good());
        if bad_mac || self.soft_errors > 0 || self.cancelled {
            1
        } else {
            0
        }
    }
}

/// Sign before the transform, verify after it.
struct Pipeline<'e> {
    engine: &'e mut ModeEngine,
    direction: Direction,
    auth: Option<&'e mut Authenticator>,
    hash_input: bool,
    emit: Emit,
}

impl ChunkProcessor for Pipeline<'_> {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> TfcResult<Emit> {
        if self.hash_input {
            if let Some(auth) = self.auth.as_deref_mut() {
                auth.update(input);
            }
        }
        self.engine.transform(self.direction, input, output)?;
        if !self.hash_input {
            if let Some(auth) = self.auth.as_deref_mut() {
                auth.update(output);
            }
        }
        Ok(self.emit)
    }
}

pub struct Session {
    config: SessionConfig,
    prompt: Option<Box<dyn PasswordPrompt + Send>>,
    cancel: CancellationToken,
    progress: Arc<Progress>,
    console: Box<dyn Write + Send>,
    status: Option<StatusReporter>,
}

impl Session {
    /// Validates the configuration; nothing is read or written yet.
    pub fn new(config: SessionConfig) -> TfcResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            prompt: None,
            cancel: CancellationToken::new(),
            progress: Progress::new(),
            console: Box::new(std::io::stderr()),
            status: None,
        })
    }

    pub fn with_prompt(mut self, prompt: Box<dyn PasswordPrompt + Send>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Where verdicts and shown counters go (stderr by default).
    pub fn with_console(mut self, console: Box<dyn Write + Send>) -> Self {
        self.console = console;
        self
    }

    pub fn with_status(mut self, status: StatusReporter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    fn prompt(&mut self) -> TfcResult<&mut (dyn PasswordPrompt + Send + 'static)> {
        self.prompt
            .as_deref_mut()
            .ok_or_else(|| TfcError::config("password required but no prompt available"))
    }

    fn say(&mut self, line: &str) -> TfcResult<()> {
        if self.config.quiet {
            return Ok(());
        }
        writeln!(self.console, "{line}").map_err(|e| TfcError::io("console", e))
    }

    /// Run the session against `source` and `destination`.
    pub fn run(
        &mut self,
        mut ep: Endpoints<'_>,
        source: &mut dyn Input,
        destination: &mut dyn Output,
    ) -> TfcResult<SessionOutcome> {
        let cfg = self.config.clone();
        let action = cfg.error_action;
        let decrypting = cfg.direction == Direction::Decrypt;
        let crypto = cfg.mode != Mode::Plain;
        let mut outcome = SessionOutcome::default();
        let mut policy = cfg.mac_policy;

        // ── MAC key ──────────────────────────────────────────────────────────
        let explicit_mac_key = match &cfg.mac_key_source {
            MacKeySource::Password => Some(kdf::mac_key_from_password(self.prompt()?)?),
            MacKeySource::File(_) => Some(kdf::mac_key_from_reader(
                required(&mut ep.mac_key, "MAC key")?,
                action,
            )?),
            MacKeySource::None | MacKeySource::PrimaryKey => None,
        };

        let tweak_file = match &cfg.tweak {
            TweakSource::File(_) => Some(kdf::read_tweak(required(&mut ep.tweak, "tweak")?, action)?),
            _ => None,
        };

        // ── stream limits ────────────────────────────────────────────────────
        let seek = cfg.source_seek.filter(|s| s.offset > 0);
        let rewind_blocks = cfg.rewind_blocks()?;
        if decrypting
            && policy.is_verify()
            && (cfg.max_bytes.is_some() || rewind_blocks > 0)
        {
            warn!("disabling signature verification on partial decryption");
            policy = MacPolicy::None;
        }

        let head = match cfg.counter_source {
            CounterSource::StreamHead => cfg.counter_bytes() as u64,
            _ => 0,
        };
        let mut max_bytes = cfg.max_bytes;
        // An embedded signature is never data, even when it goes unchecked.
        let trailing = cfg.mac_location == MacLocation::Embedded
            && (cfg.mac_policy.is_verify() || cfg.mac_policy == MacPolicy::Drop);
        if trailing {
            let size = source.size().ok_or_else(|| {
                TfcError::config("cannot locate embedded signature in a non-seekable source")
            })?;
            let offset = seek.map_or(0, |s| s.offset);
            let data = size
                .saturating_sub(cfg.mac_bytes() as u64)
                .saturating_sub(head)
                .saturating_sub(offset);
            debug!(size, data, "embedded signature located");
            max_bytes = Some(max_bytes.map_or(data, |m| m.min(data)));
        }

        // ── counter ──────────────────────────────────────────────────────────
        let supplied_counter: Option<Zeroizing<Vec<u8>>> = match &cfg.counter_source {
            CounterSource::File(_) => Some(kdf::read_exact_blob(
                required(&mut ep.counter, "counter")?,
                cfg.counter_bytes(),
                action,
                "counter",
            )?),
            CounterSource::StreamHead if crypto => {
                let ctr = kdf::read_exact_blob(source, cfg.counter_bytes(), action, "counter")?;
                outcome.report.bytes_read += ctr.len() as u64;
                self.progress.add_read(ctr.len() as u64);
                Some(ctr)
            }
            CounterSource::Random if crypto => Some(random_counter(cfg.counter_bytes())?),
            _ => None,
        };

        if let Some(s) = seek {
            if source
                .seek_to(head.saturating_add(s.offset))
                .map_err(|e| TfcError::io("seeking source", e))?
            {
                debug!(offset = s.offset, "source seeked");
            } else {
                let skipped = skip(source, s.offset, action, "source")?;
                debug!(skipped, "source skipped by reading");
            }
        }

        // ── key ──────────────────────────────────────────────────────────────
        let key = if crypto {
            Some(self.derive_key(&cfg, &mut ep, explicit_mac_key.as_ref())?)
        } else {
            None
        };

        if let (Some(out), Some(key)) = (ep.key_out.as_deref_mut(), key.as_ref()) {
            write_full(out, key.as_bytes(), ErrorAction::Exit, "key export")?;
            out.flush().map_err(|e| TfcError::io("key export", e))?;
            info!(bits = cfg.key_bits, "key exported");
            outcome.key_exported = true;
            return Ok(outcome);
        }

        let mut engine = ModeEngine::new(cfg.mode);
        let mut mac_key = explicit_mac_key;
        if let Some(key) = key {
            if cfg.mac_key_source == MacKeySource::PrimaryKey {
                mac_key = Some(kdf::mac_key_from_primary(&key));
            }
            engine.set_key(key.as_bytes());
            let tweak: [u8; TWEAK_SIZE] = match (&cfg.tweak, tweak_file) {
                (_, Some(t)) => t,
                (TweakSource::Secret, None) => kdf::derive_tweak(&key)?,
                _ => DEFAULT_TWEAK,
            };
            engine.set_tweak(&tweak);
            let counter = match supplied_counter.as_ref() {
                Some(c) => c.clone(),
                None => kdf::derive_counter(&key, engine.counter_len())?,
            };
            engine.start_counter(&counter)?;
            if cfg.show_counter {
                let format = if cfg.ascii { BinaryFormat::Base64 } else { BinaryFormat::Hex };
                let text = String::from_utf8_lossy(&render(&counter, format)).into_owned();
                self.say(&format!("CTR: {text}"))?;
            }
            if rewind_blocks > 0 {
                engine.rewind(rewind_blocks)?;
                info!(blocks = rewind_blocks, "counter rewound");
            }
        }

        let mut auth = if crypto && policy.computes_digest() {
            let mac_key = mac_key.unwrap_or_else(|| {
                warn!("no MAC key given, signature covers integrity only");
                MacKey::zero()
            });
            info!(bits = cfg.mac_bits, "MAC calculation enabled");
            Some(Authenticator::new(cfg.mac_bits, &mac_key)?)
        } else {
            None
        };

        // ── destination ──────────────────────────────────────────────────────
        if cfg.destination_seek > 0 {
            match destination.seek_to(cfg.destination_seek) {
                Ok(true) => debug!(offset = cfg.destination_seek, "destination seeked"),
                Ok(false) => {
                    warn!(offset = cfg.destination_seek, "destination cannot seek");
                    outcome.soft_errors += 1;
                }
                Err(e) if action == ErrorAction::Exit => {
                    return Err(TfcError::io("seeking destination", e));
                }
                Err(e) => {
                    warn!(offset = cfg.destination_seek, "seeking destination: {e}");
                    outcome.soft_errors += 1;
                }
            }
        }

        if let (CounterSource::Random, Some(ctr)) = (&cfg.counter_source, &supplied_counter) {
            let put = write_full(destination, ctr, action, "destination")?;
            outcome.soft_errors += put.errors;
            outcome.report.bytes_written += put.written as u64;
            self.progress.add_written(put.written as u64);
        }

        // ── transfer ─────────────────────────────────────────────────────────
        let opts = TransferOptions {
            chunk_size: cfg.chunk_size,
            max_bytes,
            error_action: action,
            pad_to_block: cfg.pad_final_block,
            fsync: cfg.fsync,
        };
        let mut pipeline = Pipeline {
            engine: &mut engine,
            direction: cfg.direction,
            auth: auth.as_mut(),
            hash_input: policy == MacPolicy::Sign,
            emit: if cfg.mac_policy == MacPolicy::VerifyOnly {
                Emit::Discard
            } else {
                Emit::Write
            },
        };
        let verb = match (crypto, cfg.direction) {
            (false, _) => "written",
            (true, Direction::Encrypt) => "encrypted",
            (true, Direction::Decrypt) => "decrypted",
        };
        let status = self.status.as_mut().map(|s| {
            s.set_verb(verb);
            s
        });
        let report = transfer(
            source,
            destination,
            &mut pipeline,
            &opts,
            &self.cancel,
            &self.progress,
            status,
        )?;
        outcome.report.bytes_read += report.bytes_read;
        outcome.report.bytes_written += report.bytes_written;
        outcome.report.soft_errors = report.soft_errors;
        outcome.soft_errors += report.soft_errors;
        outcome.cancelled = report.cancelled;
        outcome.report.cancelled = report.cancelled;

        // ── signature ────────────────────────────────────────────────────────
        if outcome.cancelled {
            warn!("interrupted, signature not processed");
        } else if let Some(auth) = auth {
            let len = cfg.mac_bytes();
            if policy == MacPolicy::Sign {
                let sig = auth.sign(&mut engine)?;
                match &cfg.mac_location {
                    MacLocation::Embedded => {
                        let put = write_full(destination, &sig, action, "destination")?;
                        outcome.soft_errors += put.errors;
                        outcome.report.bytes_written += put.written as u64;
                        self.progress.add_written(put.written as u64);
                    }
                    MacLocation::Detached(_) => {
                        let out = required(&mut ep.signature_out, "signature")?;
                        write_full(out, &encode_signature(&sig, cfg.ascii), action, "signature")?;
                        out.flush().map_err(|e| TfcError::io("signature", e))?;
                    }
                }
                info!(bytes = len, "signature written");
            } else {
                let stored = match &cfg.mac_location {
                    MacLocation::Embedded => {
                        let mut buf = Zeroizing::new(vec![0u8; len]);
                        let got = read_full(source, &mut buf, action, "signature")?;
                        outcome.soft_errors += got.errors;
                        outcome.report.bytes_read += got.filled as u64;
                        self.progress.add_read(got.filled as u64);
                        buf[..got.filled].to_vec()
                    }
                    MacLocation::Detached(_) => {
                        let mut raw = Vec::new();
                        required(&mut ep.signature_in, "signature")?
                            .read_to_end(&mut raw)
                            .map_err(|e| TfcError::io("reading signature", e))?;
                        decode_signature(&raw, len)?
                    }
                };
                let verdict = auth.verify(&mut engine, &stored)?;
                if verdict.is_good() {
                    info!("signature is good");
                }
                self.say(&verdict.message())?;
                outcome.verdict = Some(verdict);
            }
        } else if trailing {
            info!(bytes = cfg.mac_bytes(), "embedded signature dropped");
        }
        drop(engine);

        // ── finish ───────────────────────────────────────────────────────────
        if cfg.preserve_timestamps {
            if let Some(mtime) = source.modified() {
                if let Err(e) = destination.set_modified(mtime) {
                    warn!("preserving timestamps: {e}");
                }
            }
        }
        destination
            .flush()
            .map_err(|e| TfcError::io("flushing destination", e))?;
        if cfg.fsync {
            destination
                .sync()
                .map_err(|e| TfcError::io("syncing destination", e))?;
        }

        debug!(
            read = outcome.report.bytes_read,
            written = outcome.report.bytes_written,
            soft_errors = outcome.soft_errors,
            "session finished"
        );
        Ok(outcome)
    }

    fn derive_key(
        &mut self,
        cfg: &SessionConfig,
        ep: &mut Endpoints<'_>,
        mac_key: Option<&MacKey>,
    ) -> TfcResult<DerivedKey> {
        let action = cfg.error_action;
        let mut key = match &cfg.key_source {
            KeySource::Raw(_) => {
                return kdf::read_raw_key(required(&mut ep.key, "key")?, cfg.key_bits, action);
            }
            KeySource::Password => {
                let confirm = cfg.direction == Direction::Encrypt;
                kdf::password_key(self.prompt()?, confirm, cfg.key_bits)?
            }
            KeySource::Keyfile(_) => {
                let binding = mac_key.filter(|_| cfg.keyfile_bound_to_mac_key);
                kdf::keyfile_key(
                    required(&mut ep.key, "keyfile")?,
                    cfg.keyfile_limit,
                    cfg.key_bits,
                    binding,
                    action,
                )?
            }
        };
        if cfg.passes > 1 {
            info!(passes = cfg.passes, "stretching key");
        }
        kdf::stretch(&mut key, cfg.passes)?;
        Ok(key)
    }
}
