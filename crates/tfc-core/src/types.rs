use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TfcError;

/// Cipher mode of operation. `Plain` disables every cryptographic transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plain,
    #[default]
    Ctr,
    Tctr,
    Cbc,
}

impl Mode {
    /// True for the counter-driven modes that support seeking.
    pub fn is_seekable(self) -> bool {
        matches!(self, Mode::Ctr | Mode::Tctr)
    }
}

impl FromStr for Mode {
    type Err = TfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Mode::Plain),
            "ctr" => Ok(Mode::Ctr),
            "tctr" => Ok(Mode::Tctr),
            "cbc" => Ok(Mode::Cbc),
            other => Err(TfcError::config(format!(
                "{other}: invalid mode of operation"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Plain => "plain",
            Mode::Ctr => "ctr",
            Mode::Tctr => "tctr",
            Mode::Cbc => "cbc",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Encrypt,
    Decrypt,
}

/// What to do when a read or write fails mid-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    /// Report and abort the run.
    #[default]
    Exit,
    /// Report and carry on with whatever was transferred; no padding.
    Continue,
    /// Report and treat the missing part of the chunk as zeroes (reads only).
    #[serde(rename = "sync")]
    SyncPad,
}

impl FromStr for ErrorAction {
    type Err = TfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exit" => Ok(ErrorAction::Exit),
            s if s.starts_with("cont") => Ok(ErrorAction::Continue),
            "sync" => Ok(ErrorAction::SyncPad),
            other => Err(TfcError::config(format!(
                "invalid error action {other} specified"
            ))),
        }
    }
}

impl ErrorAction {
    /// Policy for fixed-width key and counter reads: a tolerated
    /// error always leaves a zero-filled buffer rather than a short one.
    pub fn for_fixed_reads(self) -> Self {
        match self {
            ErrorAction::Continue => ErrorAction::SyncPad,
            other => other,
        }
    }
}

/// A file path or the process's standard stream (`-`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoTarget {
    Stdio,
    Path(PathBuf),
}

impl IoTarget {
    pub fn is_stdio(&self) -> bool {
        matches!(self, IoTarget::Stdio)
    }
}

impl FromStr for IoTarget {
    type Err = TfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(TfcError::config("empty path")),
            "-" => Ok(IoTarget::Stdio),
            p => Ok(IoTarget::Path(PathBuf::from(p))),
        }
    }
}

impl fmt::Display for IoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoTarget::Stdio => f.write_str("-"),
            IoTarget::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Where the primary key comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeySource {
    /// Exactly `key_bits / 8` raw bytes.
    Raw(IoTarget),
    /// Prompted password, hashed into a key.
    #[default]
    Password,
    /// Arbitrary file contents, stream-hashed into a key.
    Keyfile(IoTarget),
}

/// What happens to a MAC over the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacPolicy {
    #[default]
    None,
    Sign,
    Verify,
    /// Verify, but never write the recovered plaintext.
    VerifyOnly,
    /// Strip an embedded signature without checking it.
    Drop,
}

impl MacPolicy {
    pub fn is_verify(self) -> bool {
        matches!(self, MacPolicy::Verify | MacPolicy::VerifyOnly)
    }

    /// True when a digest is computed over the stream.
    pub fn computes_digest(self) -> bool {
        matches!(
            self,
            MacPolicy::Sign | MacPolicy::Verify | MacPolicy::VerifyOnly
        )
    }
}

/// Where the signature lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MacLocation {
    /// Appended to (or read from the tail of) the data stream.
    #[default]
    Embedded,
    Detached(IoTarget),
}

/// Source of the key used for the keyed digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MacKeySource {
    /// No MAC key: the digest is keyed with zeroes.
    #[default]
    None,
    /// Reuse the primary encryption key.
    PrimaryKey,
    Password,
    File(IoTarget),
}

impl FromStr for MacKeySource {
    type Err = TfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("key") {
            Ok(MacKeySource::PrimaryKey)
        } else if s.eq_ignore_ascii_case("pwd") {
            Ok(MacKeySource::Password)
        } else {
            Ok(MacKeySource::File(s.parse()?))
        }
    }
}

/// Origin of the initial counter / IV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CounterSource {
    /// Hash of the derived key.
    #[default]
    Derived,
    File(IoTarget),
    /// First counter-width bytes of the source stream.
    StreamHead,
    /// Random, written to the head of the destination stream.
    Random,
}

impl FromStr for CounterSource {
    type Err = TfcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("head") {
            Ok(CounterSource::StreamHead)
        } else if s.eq_ignore_ascii_case("rand") {
            Ok(CounterSource::Random)
        } else if s.eq_ignore_ascii_case("derived") {
            Ok(CounterSource::Derived)
        } else {
            Ok(CounterSource::File(s.parse()?))
        }
    }
}

/// Origin of the cipher tweak.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TweakSource {
    /// The built-in constant.
    #[default]
    Builtin,
    /// Hash of the derived key.
    Secret,
    File(IoTarget),
}

/// Encoding of a detached signature or a printed digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryFormat {
    /// Lowercase hex (digests only; signatures fall back to raw).
    #[default]
    Hex,
    /// Base64; signatures carry the `%MAC` tag.
    Base64,
    Raw,
}

/// Unit system for `k`, `M`, `G` ... suffixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnits {
    #[default]
    Binary,
    Si,
}

impl SizeUnits {
    pub fn kilo(self) -> u64 {
        match self {
            SizeUnits::Binary => 1024,
            SizeUnits::Si => 1000,
        }
    }
}

/// Pre-transfer source positioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub offset: u64,
    /// Advance the counter by `offset / BLOCK_SIZE` blocks as well.
    pub adjust_counter: bool,
}
