use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{TfcError, TfcResult};
use crate::types::{
    CounterSource, Direction, ErrorAction, IoTarget, KeySource, MacKeySource, MacLocation,
    MacPolicy, Mode, SeekRequest, SizeUnits, TweakSource,
};
use crate::{BLOCK_SIZE, DEFAULT_CHUNK_SIZE, MAX_BITS};

/// Defaults file (loaded from `config.toml`); command-line flags override it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TfcConfig {
    pub crypt: CryptConfig,
    pub io: IoConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Mode of operation (default: ctr)
    pub mode: Mode,
    /// Key width in bits, 8..=1024 in steps of 8
    pub key_bits: u32,
    /// Signature width in bits, 8..=1024 in steps of 8
    pub mac_bits: u32,
    /// Key stretching passes (default: 1)
    pub passes: u32,
    /// Derive the tweak from the key instead of using the built-in one
    pub secret_tweak: bool,
    /// Read the tweak from this file instead
    pub tweak_file: Option<PathBuf>,
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Ctr,
            key_bits: MAX_BITS,
            mac_bits: MAX_BITS,
            passes: 1,
            secret_tweak: false,
            tweak_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Transfer chunk size in bytes (default: 65536)
    pub chunk_size: usize,
    /// What to do on a read/write error: "exit", "continue" or "sync"
    pub error_action: ErrorAction,
    /// fsync the destination after every write
    pub fsync: bool,
    /// Zero-pad the final chunk to a block boundary
    pub pad: bool,
    /// Copy modification time from source to destination
    pub preserve_timestamps: bool,
    /// Use 1000-based units in sizes and status output
    pub si_units: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            error_action: ErrorAction::Exit,
            fsync: false,
            pad: false,
            preserve_timestamps: false,
            si_units: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

/// Everything one run of the engine needs, already parsed.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,
    pub direction: Direction,
    pub key_bits: u32,
    pub mac_bits: u32,
    pub passes: u32,

    pub key_source: KeySource,
    /// Stop hashing a keyfile after this many bytes.
    pub keyfile_limit: Option<u64>,
    /// Key the keyfile hash with the MAC key when one was derived first.
    pub keyfile_bound_to_mac_key: bool,

    pub mac_policy: MacPolicy,
    pub mac_location: MacLocation,
    pub mac_key_source: MacKeySource,
    /// Detached signatures and shown counters in `%MAC`/base64 form.
    pub ascii: bool,

    pub counter_source: CounterSource,
    pub show_counter: bool,
    /// Extra counter advance in blocks.
    pub ctr_blocks: u64,
    /// Extra counter advance in bytes; must be a block multiple.
    pub ctr_bytes: u64,
    pub tweak: TweakSource,

    pub source_seek: Option<SeekRequest>,
    pub destination_seek: u64,
    /// Ceiling on data bytes read from the source.
    pub max_bytes: Option<u64>,
    pub chunk_size: usize,
    pub error_action: ErrorAction,
    pub pad_final_block: bool,
    pub fsync: bool,
    pub preserve_timestamps: bool,
    pub overwrite_source: bool,
    pub truncate: bool,

    pub units: SizeUnits,
    pub status_interval: Option<Duration>,
    pub quiet: bool,
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&TfcConfig::default())
    }
}

impl From<&TfcConfig> for SessionConfig {
    fn from(cfg: &TfcConfig) -> Self {
        let tweak = match (&cfg.crypt.tweak_file, cfg.crypt.secret_tweak) {
            (Some(p), _) => TweakSource::File(IoTarget::Path(p.clone())),
            (None, true) => TweakSource::Secret,
            (None, false) => TweakSource::Builtin,
        };
        Self {
            mode: cfg.crypt.mode,
            direction: Direction::Encrypt,
            key_bits: cfg.crypt.key_bits,
            mac_bits: cfg.crypt.mac_bits,
            passes: cfg.crypt.passes,
            key_source: KeySource::Password,
            keyfile_limit: None,
            keyfile_bound_to_mac_key: true,
            mac_policy: MacPolicy::None,
            mac_location: MacLocation::Embedded,
            mac_key_source: MacKeySource::None,
            ascii: false,
            counter_source: CounterSource::Derived,
            show_counter: false,
            ctr_blocks: 0,
            ctr_bytes: 0,
            tweak,
            source_seek: None,
            destination_seek: 0,
            max_bytes: None,
            chunk_size: cfg.io.chunk_size,
            error_action: cfg.io.error_action,
            pad_final_block: cfg.io.pad,
            fsync: cfg.io.fsync,
            preserve_timestamps: cfg.io.preserve_timestamps,
            overwrite_source: false,
            truncate: false,
            units: if cfg.io.si_units {
                SizeUnits::Si
            } else {
                SizeUnits::Binary
            },
            status_interval: None,
            quiet: false,
            verbose: false,
        }
    }
}

/// Checks a bit width: 8..=1024, multiple of 8.
pub fn check_bits(bits: u32, what: &str) -> TfcResult<()> {
    if bits < 8 || bits > MAX_BITS || bits % 8 != 0 {
        return Err(TfcError::config(format!("{bits}: invalid {what} setting")));
    }
    Ok(())
}

impl SessionConfig {
    pub fn key_bytes(&self) -> usize {
        (self.key_bits / 8) as usize
    }

    pub fn mac_bytes(&self) -> usize {
        (self.mac_bits / 8) as usize
    }

    /// Width of the counter: one block, or the tweak width for TCTR.
    pub fn counter_bytes(&self) -> usize {
        match self.mode {
            Mode::Tctr => crate::TWEAK_SIZE,
            _ => BLOCK_SIZE,
        }
    }

    /// Counter advance in blocks requested independently of seeking.
    pub fn counter_advance(&self) -> TfcResult<u64> {
        self.ctr_blocks
            .checked_add(self.ctr_bytes / BLOCK_SIZE as u64)
            .ok_or_else(|| TfcError::config("counter increment overflows"))
    }

    /// Blocks to rewind before the transfer: increments plus an adjusting seek.
    pub fn rewind_blocks(&self) -> TfcResult<u64> {
        let seek = match self.source_seek {
            Some(s) if s.adjust_counter && self.mode != Mode::Plain => s.offset / BLOCK_SIZE as u64,
            _ => 0,
        };
        self.counter_advance()?
            .checked_add(seek)
            .ok_or_else(|| TfcError::config("counter increment overflows"))
    }

    /// Reject every contradictory combination before any I/O happens.
    pub fn validate(&self) -> TfcResult<()> {
        check_bits(self.key_bits, "bits")?;
        check_bits(self.mac_bits, "MAC bits")?;
        if self.passes == 0 {
            return Err(TfcError::config("0: invalid number of passes"));
        }
        if self.chunk_size == 0 {
            return Err(TfcError::config("chunk size must be positive"));
        }

        let advance = self.counter_advance()?;
        self.rewind_blocks()?;

        let decrypting = self.direction == Direction::Decrypt;
        if !decrypting && self.mac_policy.is_verify() {
            return Err(TfcError::config("cannot encrypt and verify signature"));
        }
        if decrypting && self.mac_policy == MacPolicy::Sign {
            return Err(TfcError::config("cannot decrypt and calculate signature"));
        }
        if self.mac_policy == MacPolicy::Sign
            && self.ascii
            && self.mac_location == MacLocation::Embedded
        {
            return Err(TfcError::config(
                "only binary signatures are embedded into encrypted file",
            ));
        }
        if self.mac_policy == MacPolicy::Drop && self.mac_location != MacLocation::Embedded {
            return Err(TfcError::config("only embedded signatures can be dropped"));
        }
        if decrypting && self.counter_source == CounterSource::Random {
            return Err(TfcError::config(
                "cannot decrypt and embed a generated CTR into file",
            ));
        }
        if !decrypting && self.counter_source == CounterSource::StreamHead {
            return Err(TfcError::config("cannot encrypt and read CTR from source"));
        }
        if self.overwrite_source && self.counter_source == CounterSource::Random {
            return Err(TfcError::config(
                "cannot embed a CTR into file when overwriting it",
            ));
        }

        if self.mode == Mode::Plain {
            let uses_crypto = self.mac_policy != MacPolicy::None
                || matches!(self.key_source, KeySource::Raw(_))
                || self.mac_key_source != MacKeySource::None
                || self.counter_source != CounterSource::Derived
                || self.show_counter
                || advance != 0;
            if uses_crypto {
                return Err(TfcError::config(
                    "encryption facility is disabled when in plain IO mode",
                ));
            }
        }

        if self.ctr_bytes % BLOCK_SIZE as u64 != 0 {
            return Err(TfcError::config(format!(
                "{}: not round to TF block size of {BLOCK_SIZE} bytes",
                self.ctr_bytes
            )));
        }
        if let Some(seek) = self.source_seek {
            if seek.adjust_counter && self.mode != Mode::Plain {
                if seek.offset % BLOCK_SIZE as u64 != 0 {
                    return Err(TfcError::config(format!(
                        "{}: not round to TF block size of {BLOCK_SIZE} bytes",
                        seek.offset
                    )));
                }
                if self.mode == Mode::Cbc && seek.offset != 0 {
                    return Err(TfcError::config("counter seeking is not possible in CBC mode"));
                }
            }
        }
        if self.mode == Mode::Cbc && advance != 0 {
            return Err(TfcError::config("counter increments are not possible in CBC mode"));
        }
        Ok(())
    }
}
