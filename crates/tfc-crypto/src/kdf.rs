//! Key, tweak and counter derivation.
//!
//! The primary key comes from raw bytes, a prompted password, or a hashed
//! keyfile, optionally stretched by re-hashing. Counter and secret tweak are
//! hashes of the full (zero-padded) key buffer.

use std::io::Read;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use tfc_core::io::read_full;
use tfc_core::types::ErrorAction;
use tfc_core::{TfcError, TfcResult, DEFAULT_CHUNK_SIZE, KEY_SIZE, TWEAK_SIZE};

use crate::skein::{digest, MacKey, MacKeyHasher, Skein};

/// Tweak used unless a tweak file or a secret tweak is requested.
pub const DEFAULT_TWEAK: [u8; TWEAK_SIZE] = *b"tfcrypt tweak v1";

/// Source of interactively entered secrets.
pub trait PasswordPrompt {
    /// Ask for a secret. An `Err` aborts the run.
    fn prompt(&mut self, message: &str) -> TfcResult<SecretString>;
}

/// Primary key, `len` meaningful bytes in a zero-padded full-width buffer.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
    len: usize,
}

impl DerivedKey {
    pub fn from_slice(key: &[u8]) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        let len = key.len().min(KEY_SIZE);
        bytes[..len].copy_from_slice(&key[..len]);
        Self { bytes, len }
    }

    /// The `bits / 8` bytes of key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The full-width buffer, zero past the key length.
    pub fn buffer(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.len)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Read exactly `bits / 8` bytes of raw key.
pub fn read_raw_key<R: Read + ?Sized>(
    reader: &mut R,
    bits: u32,
    action: ErrorAction,
) -> TfcResult<DerivedKey> {
    let need = (bits / 8) as usize;
    let mut buf = Zeroizing::new([0u8; KEY_SIZE]);
    let got = read_full(reader, &mut buf[..need], action.for_fixed_reads(), "reading key")?;
    if got.filled < need {
        return Err(TfcError::ShortSource {
            what: "rawkey",
            got: got.filled,
            need,
        });
    }
    Ok(DerivedKey::from_slice(&buf[..need]))
}

/// Ask for a password (twice when `confirm`) and hash it into a key.
pub fn password_key(
    prompt: &mut dyn PasswordPrompt,
    confirm: bool,
    bits: u32,
) -> TfcResult<DerivedKey> {
    let password = loop {
        let first = prompt.prompt("Enter password: ")?;
        if !confirm {
            break first;
        }
        let again = prompt.prompt("Enter it again: ")?;
        if first.expose_secret() == again.expose_secret() {
            break first;
        }
        warn!("Passwords are different, try again");
    };
    info!("hashing password");
    let key = Zeroizing::new(digest(password.expose_secret().as_bytes(), bits, None)?);
    Ok(DerivedKey::from_slice(&key))
}

/// Stream up to `limit` bytes of `reader` through `hasher`.
///
/// A tolerated read error that yields nothing ends the input, so a
/// persistently failing source cannot stall the loop.
pub fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    mut hasher: Skein,
    limit: Option<u64>,
    action: ErrorAction,
    what: &str,
) -> TfcResult<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; DEFAULT_CHUNK_SIZE]);
    let mut total = 0u64;
    loop {
        let want = match limit {
            Some(l) if l - total < buf.len() as u64 => (l - total) as usize,
            _ => buf.len(),
        };
        if want == 0 {
            break;
        }
        let got = read_full(reader, &mut buf[..want], action, what)?;
        hasher.update(&buf[..got.filled]);
        total += got.filled as u64;
        if got.eof || (got.filled == 0 && !got.is_clean()) {
            break;
        }
    }
    Ok(Zeroizing::new(hasher.finalize()))
}

/// Hash a keyfile into a key, keyed by `mac_key` when given.
pub fn keyfile_key<R: Read + ?Sized>(
    reader: &mut R,
    limit: Option<u64>,
    bits: u32,
    mac_key: Option<&MacKey>,
    action: ErrorAction,
) -> TfcResult<DerivedKey> {
    info!(limit = ?limit, keyed = mac_key.is_some(), "hashing keyfile");
    let hasher = Skein::new(bits, mac_key)?;
    let key = hash_reader(reader, hasher, limit, action, "hashing key")?;
    Ok(DerivedKey::from_slice(&key))
}

/// Re-hash the key `passes - 1` more times.
pub fn stretch(key: &mut DerivedKey, passes: u32) -> TfcResult<()> {
    if passes == 0 {
        return Err(TfcError::config("0: invalid number of passes"));
    }
    let bits = (key.len * 8) as u32;
    for _ in 1..passes {
        let next = Zeroizing::new(digest(key.as_bytes(), bits, None)?);
        key.bytes[..key.len].copy_from_slice(&next);
    }
    Ok(())
}

/// Counter of `len` bytes derived from the full key buffer.
pub fn derive_counter(key: &DerivedKey, len: usize) -> TfcResult<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(digest(key.buffer(), (len * 8) as u32, None)?))
}

/// Secret tweak derived from the full key buffer.
pub fn derive_tweak(key: &DerivedKey) -> TfcResult<[u8; TWEAK_SIZE]> {
    let mut d = digest(key.buffer(), (TWEAK_SIZE * 8) as u32, None)?;
    let mut tweak = [0u8; TWEAK_SIZE];
    tweak.copy_from_slice(&d);
    d.zeroize();
    Ok(tweak)
}

/// Read a fixed-width binary blob (counter or tweak); short input is fatal.
pub fn read_exact_blob<R: Read + ?Sized>(
    reader: &mut R,
    len: usize,
    action: ErrorAction,
    what: &'static str,
) -> TfcResult<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    let got = read_full(reader, &mut buf, action.for_fixed_reads(), what)?;
    if got.filled < len {
        return Err(TfcError::ShortSource {
            what,
            got: got.filled,
            need: len,
        });
    }
    Ok(buf)
}

pub fn read_tweak<R: Read + ?Sized>(
    reader: &mut R,
    action: ErrorAction,
) -> TfcResult<[u8; TWEAK_SIZE]> {
    let blob = read_exact_blob(reader, TWEAK_SIZE, action, "tweak")?;
    let mut tweak = [0u8; TWEAK_SIZE];
    tweak.copy_from_slice(&blob);
    Ok(tweak)
}

/// MAC key from a stream of any length.
pub fn mac_key_from_reader<R: Read + ?Sized>(
    reader: &mut R,
    action: ErrorAction,
) -> TfcResult<MacKey> {
    let mut hasher = MacKeyHasher::new();
    let mut buf = Zeroizing::new(vec![0u8; DEFAULT_CHUNK_SIZE]);
    loop {
        let got = read_full(reader, &mut buf, action, "reading MAC key")?;
        hasher.update(&buf[..got.filled]);
        if got.eof || (got.filled == 0 && !got.is_clean()) {
            break;
        }
    }
    Ok(hasher.finish())
}

pub fn mac_key_from_password(prompt: &mut dyn PasswordPrompt) -> TfcResult<MacKey> {
    let password = prompt.prompt("Enter MAC password: ")?;
    Ok(MacKey::from_bytes(password.expose_secret().as_bytes()))
}

/// MAC key taken from the full primary key buffer.
pub fn mac_key_from_primary(key: &DerivedKey) -> MacKey {
    MacKey::from_bytes(key.buffer())
}
