//! Keyed digest over the stream and the encrypted signature that carries it.
//!
//! The signature is the digest run through the session's mode engine, which
//! continues the counter sequence of the data: encrypt when signing, decrypt
//! when verifying.

use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use tfc_core::types::Direction;
use tfc_core::{TfcError, TfcResult, ASCII_MAC_TAG};

use crate::mode::ModeEngine;
use crate::skein::{MacKey, Skein};

/// Outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Bad,
    /// Only this many signature bytes were available.
    Short(usize),
}

impl Verdict {
    pub fn is_good(self) -> bool {
        self == Verdict::Good
    }

    pub fn message(self) -> String {
        match self {
            Verdict::Good => "signature is good".into(),
            Verdict::Bad => {
                "signature is BAD: wrong password, key, or file is not signed".into()
            }
            Verdict::Short(n) => format!("short signature ({n}), not verifying"),
        }
    }
}

/// Running keyed digest for one session.
pub struct Authenticator {
    hasher: Skein,
}

impl Authenticator {
    pub fn new(bits: u32, key: &MacKey) -> TfcResult<Self> {
        Ok(Self {
            hasher: Skein::new(bits, Some(key))?,
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn signature_len(&self) -> usize {
        self.hasher.output_len()
    }

    /// Finish the digest and encrypt it into a signature.
    pub fn sign(self, engine: &mut ModeEngine) -> TfcResult<Zeroizing<Vec<u8>>> {
        let digest = Zeroizing::new(self.hasher.finalize());
        let mut sig = Zeroizing::new(vec![0u8; digest.len()]);
        engine.transform(Direction::Encrypt, &digest, &mut sig)?;
        Ok(sig)
    }

    /// Finish the digest and compare it with a stored signature.
    pub fn verify(self, engine: &mut ModeEngine, stored: &[u8]) -> TfcResult<Verdict> {
        let need = self.signature_len();
        if stored.len() < need {
            return Ok(Verdict::Short(stored.len()));
        }
        let digest = Zeroizing::new(self.hasher.finalize());
        let mut expected = Zeroizing::new(vec![0u8; need]);
        engine.transform(Direction::Decrypt, &stored[..need], &mut expected)?;
        let ok: bool = digest.ct_eq(&expected[..]).into();
        debug!(good = ok, bytes = need, "signature compared");
        Ok(if ok { Verdict::Good } else { Verdict::Bad })
    }
}

/// Serialize a signature: raw bytes, or `%MAC` + base64 + newline.
pub fn encode_signature(sig: &[u8], ascii: bool) -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    if !ascii {
        return sig.to_vec();
    }
    let mut out = Vec::with_capacity(ASCII_MAC_TAG.len() + sig.len() * 4 / 3 + 5);
    out.extend_from_slice(ASCII_MAC_TAG);
    out.extend_from_slice(STANDARD.encode(sig).as_bytes());
    out.push(b'\n');
    out
}

/// Parse a detached signature, detecting the ASCII form by its tag.
///
/// Raw input is truncated to `len` bytes; fewer bytes come back as-is so the
/// caller can report a short signature.
pub fn decode_signature(data: &[u8], len: usize) -> TfcResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    match data.strip_prefix(&ASCII_MAC_TAG[..]) {
        Some(body) => {
            let text = std::str::from_utf8(body)
                .map_err(|_| TfcError::Signature("ASCII signature is not text".into()))?;
            let mut raw = STANDARD
                .decode(text.trim())
                .map_err(|e| TfcError::Signature(format!("base64 decode: {e}")))?;
            raw.truncate(len);
            Ok(raw)
        }
        None => Ok(data[..data.len().min(len)].to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfc_core::types::Mode;

    fn engine(mode: Mode) -> ModeEngine {
        let mut e = ModeEngine::new(mode);
        e.set_key(&[3u8; 128]);
        e.set_tweak(&[0u8; 16]);
        let ctr = vec![1u8; e.counter_len()];
        e.start_counter(&ctr).unwrap();
        e
    }

    fn authed(data: &[u8], bits: u32) -> Authenticator {
        let mut a = Authenticator::new(bits, &MacKey::from_bytes(b"mac key")).unwrap();
        a.update(data);
        a
    }

    #[test]
    fn sign_then_verify() {
        for mode in [Mode::Ctr, Mode::Tctr, Mode::Cbc] {
            for bits in [256, 1024] {
                let sig = authed(b"hello", bits).sign(&mut engine(mode)).unwrap();
                assert_eq!(sig.len(), (bits / 8) as usize);
                let v = authed(b"hello", bits).verify(&mut engine(mode), &sig).unwrap();
                assert_eq!(v, Verdict::Good, "{mode} {bits}");
                let v = authed(b"hellO", bits).verify(&mut engine(mode), &sig).unwrap();
                assert_eq!(v, Verdict::Bad, "{mode} {bits}");
            }
        }
    }

    #[test]
    fn short_signature_is_distinct() {
        let v = authed(b"x", 512).verify(&mut engine(Mode::Ctr), &[0u8; 10]).unwrap();
        assert_eq!(v, Verdict::Short(10));
        assert_eq!(v.message(), "short signature (10), not verifying");
    }

    #[test]
    fn signature_depends_on_counter_position() {
        let sig = authed(b"data", 512).sign(&mut engine(Mode::Ctr)).unwrap();
        let mut moved = engine(Mode::Ctr);
        moved.rewind(1).unwrap();
        let v = authed(b"data", 512).verify(&mut moved, &sig).unwrap();
        assert_eq!(v, Verdict::Bad);
    }

    #[test]
    fn container_formats() {
        let sig = [0xABu8; 32];
        let raw = encode_signature(&sig, false);
        assert_eq!(raw, sig);
        let ascii = encode_signature(&sig, true);
        assert!(ascii.starts_with(b"%MAC"));
        assert_eq!(ascii.last(), Some(&b'\n'));

        assert_eq!(decode_signature(&raw, 32).unwrap(), sig);
        assert_eq!(decode_signature(&ascii, 32).unwrap(), sig);
        assert_eq!(decode_signature(&raw[..5], 32).unwrap().len(), 5);
        assert!(decode_signature(b"%MAC***\n", 32).is_err());
    }
}
