//! Skein-1024 hash with variable output width, built as UBI chaining over
//! Threefish-1024.
//!
//! Keyed use is split in two: [`MacKeyHasher`] streams key material into a
//! [`MacKey`] chaining value, and [`Skein::new`] takes that value as its
//! starting point. Outputs are at most one block (1024 bits), so the output
//! stage is a single UBI call.

use zeroize::{Zeroize, ZeroizeOnDrop};

use tfc_core::{TfcError, TfcResult, BLOCK_SIZE, MAX_BITS};

use crate::threefish::{encrypt_words, load_words, store_words, BLOCK_WORDS};

const T_KEY: u64 = 0;
const T_CFG: u64 = 4;
const T_MSG: u64 = 48;
const T_OUT: u64 = 63;

const FIRST: u64 = 1 << 62;
const FINAL: u64 = 1 << 63;

type Chain = [u64; BLOCK_WORDS];

/// Streaming UBI over one type of input.
///
/// The last block is held back until `finish`, since it has to carry the
/// final flag.
#[derive(Zeroize, ZeroizeOnDrop)]
struct Ubi {
    chain: Chain,
    kind: u64,
    pos: u128,
    first: bool,
    buf: [u8; BLOCK_SIZE],
    buf_len: usize,
}

impl Ubi {
    fn new(chain: Chain, kind: u64) -> Self {
        Self {
            chain,
            kind,
            pos: 0,
            first: true,
            buf: [0; BLOCK_SIZE],
            buf_len: 0,
        }
    }

    fn compress(&mut self, last: bool) {
        self.pos += self.buf_len as u128;
        let mut t1 = ((self.pos >> 64) as u64) | (self.kind << 56);
        if self.first {
            t1 |= FIRST;
        }
        if last {
            t1 |= FINAL;
        }
        self.buf[self.buf_len..].fill(0);
        let msg: Chain = load_words(&self.buf);
        let mut block = msg;
        encrypt_words(&self.chain, [self.pos as u64, t1], &mut block);
        for (c, (e, m)) in self.chain.iter_mut().zip(block.iter().zip(msg.iter())) {
            *c = e ^ m;
        }
        self.first = false;
        self.buf_len = 0;
    }

    fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.buf_len == BLOCK_SIZE {
                self.compress(false);
            }
            let take = (BLOCK_SIZE - self.buf_len).min(data.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&data[..take]);
            self.buf_len += take;
            data = &data[take..];
        }
    }

    fn finish(mut self) -> Chain {
        self.compress(true);
        self.chain
    }
}

fn ubi(chain: Chain, data: &[u8], kind: u64) -> Chain {
    let mut u = Ubi::new(chain, kind);
    u.update(data);
    u.finish()
}

/// Chaining value produced from MAC key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    chain: Chain,
}

impl MacKey {
    /// Derive a MAC key from a single buffer.
    pub fn from_bytes(key: &[u8]) -> Self {
        let mut h = MacKeyHasher::new();
        h.update(key);
        h.finish()
    }

    /// The all-zero key used when no MAC key source is configured.
    pub fn zero() -> Self {
        Self {
            chain: [0; BLOCK_WORDS],
        }
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey").field("chain", &"[REDACTED]").finish()
    }
}

/// Incremental key-only hashing: feeds key material of any length.
pub struct MacKeyHasher {
    ubi: Ubi,
}

impl Default for MacKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl MacKeyHasher {
    pub fn new() -> Self {
        Self {
            ubi: Ubi::new([0; BLOCK_WORDS], T_KEY),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.ubi.update(data);
    }

    pub fn finish(self) -> MacKey {
        MacKey {
            chain: self.ubi.finish(),
        }
    }
}

/// Incremental Skein-1024 with an output width of `bits` (8..=1024, step 8).
pub struct Skein {
    msg: Ubi,
    out_bytes: usize,
}

impl Skein {
    pub fn new(bits: u32, key: Option<&MacKey>) -> TfcResult<Self> {
        if bits == 0 || bits > MAX_BITS || bits % 8 != 0 {
            return Err(TfcError::Cipher(format!("{bits}: invalid digest width")));
        }
        let start = key.map(|k| k.chain).unwrap_or([0; BLOCK_WORDS]);

        let mut cfg = [0u8; 32];
        cfg[..4].copy_from_slice(b"SHA3");
        cfg[4..6].copy_from_slice(&1u16.to_le_bytes());
        cfg[8..16].copy_from_slice(&u64::from(bits).to_le_bytes());
        let iv = ubi(start, &cfg, T_CFG);

        Ok(Self {
            msg: Ubi::new(iv, T_MSG),
            out_bytes: (bits / 8) as usize,
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.msg.update(data);
    }

    pub fn output_len(&self) -> usize {
        self.out_bytes
    }

    /// Finish into `out`, which must be exactly `bits / 8` bytes.
    pub fn finalize_into(self, out: &mut [u8]) {
        let g = self.msg.finish();
        let mut full = ubi(g, &0u64.to_le_bytes(), T_OUT);
        let mut bytes = [0u8; BLOCK_SIZE];
        store_words(&full, &mut bytes);
        let n = out.len().min(self.out_bytes);
        out[..n].copy_from_slice(&bytes[..n]);
        bytes.zeroize();
        full.zeroize();
    }

    pub fn finalize(self) -> Vec<u8> {
        let mut out = vec![0u8; self.out_bytes];
        self.finalize_into(&mut out);
        out
    }
}

/// One-shot digest.
pub fn digest(data: &[u8], bits: u32, key: Option<&MacKey>) -> TfcResult<Vec<u8>> {
    let mut h = Skein::new(bits, key)?;
    h.update(data);
    Ok(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn output_width_follows_bits() {
        for bits in [8, 128, 256, 512, 1024] {
            let d = digest(b"abc", bits, None).unwrap();
            assert_eq!(d.len(), (bits / 8) as usize);
        }
        assert!(Skein::new(12, None).is_err());
        assert!(Skein::new(2048, None).is_err());
    }

    #[test]
    fn width_is_part_of_the_hash() {
        let short = digest(b"abc", 256, None).unwrap();
        let long = digest(b"abc", 512, None).unwrap();
        assert_ne!(short[..], long[..32]);
    }

    #[test]
    fn key_changes_digest() {
        let k1 = MacKey::from_bytes(b"one");
        let k2 = MacKey::from_bytes(b"two");
        let a = digest(b"payload", 512, Some(&k1)).unwrap();
        let b = digest(b"payload", 512, Some(&k2)).unwrap();
        let c = digest(b"payload", 512, None).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_and_block_aligned_inputs() {
        let e = digest(b"", 1024, None).unwrap();
        let z = digest(&[0u8; 128], 1024, None).unwrap();
        let z2 = digest(&[0u8; 256], 1024, None).unwrap();
        assert_ne!(e, z);
        assert_ne!(z, z2);
    }

    #[test]
    fn mac_key_streaming_matches_one_shot() {
        let mut h = MacKeyHasher::new();
        for part in [&b"split "[..], b"mac ", b"key material"] {
            h.update(part);
        }
        let streamed = digest(b"x", 256, Some(&h.finish())).unwrap();
        let one_shot = digest(b"x", 256, Some(&MacKey::from_bytes(b"split mac key material"))).unwrap();
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn unkeyed_digest_matches_reference_skein() {
        use ::skein::digest::consts::{U128, U64};
        use ::skein::{Digest, Skein1024};

        let long: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 256) as u8).collect();
        let inputs: [&[u8]; 6] = [b"", &[0xff], b"abc", &[0u8; 128], &[0x5a; 129], &long];
        for data in inputs {
            let ours = digest(data, 1024, None).unwrap();
            assert_eq!(ours[..], Skein1024::<U128>::digest(data)[..], "len {}", data.len());
            let ours = digest(data, 512, None).unwrap();
            assert_eq!(ours[..], Skein1024::<U64>::digest(data)[..], "len {}", data.len());
        }
    }

    proptest! {
        #[test]
        fn incremental_matches_one_shot(
            data in proptest::collection::vec(any::<u8>(), 0..=1000),
            split in 0usize..=1000,
        ) {
            let split = split.min(data.len());
            let mut h = Skein::new(512, None).unwrap();
            h.update(&data[..split]);
            h.update(&data[split..]);
            prop_assert_eq!(h.finalize(), digest(&data, 512, None).unwrap());
        }
    }
}
