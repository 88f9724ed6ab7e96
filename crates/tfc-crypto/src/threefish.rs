//! Threefish-1024 block cipher adapter over the `threefish` crate.
//!
//! The crate takes key and tweak as little-endian 64-bit words and expands
//! the key schedule at construction, so a changed tweak means a new instance.

use threefish::Threefish1024;
use zeroize::{Zeroize, ZeroizeOnDrop};

use tfc_core::{BLOCK_SIZE, KEY_SIZE, TWEAK_SIZE};

pub const BLOCK_WORDS: usize = BLOCK_SIZE / 8;

/// One cipher block.
pub type Block = [u8; BLOCK_SIZE];

pub(crate) fn load_words<const N: usize>(bytes: &[u8]) -> [u64; N] {
    let mut out = [0u64; N];
    for (w, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut b = [0u8; 8];
        b.copy_from_slice(chunk);
        *w = u64::from_le_bytes(b);
    }
    out
}

pub(crate) fn store_words(words: &[u64], out: &mut [u8]) {
    for (w, chunk) in words.iter().zip(out.chunks_exact_mut(8)) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
}

/// Keyed, tweaked Threefish-1024 permutation.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BlockCipher {
    key: [u64; BLOCK_WORDS],
    tweak: [u64; 2],
    #[zeroize(skip)]
    inner: Option<Threefish1024>,
}

impl Default for BlockCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCipher {
    pub fn new() -> Self {
        Self {
            key: [0; BLOCK_WORDS],
            tweak: [0; 2],
            inner: None,
        }
    }

    /// Install a key. Shorter keys are zero-padded to the full width.
    pub fn set_key(&mut self, key: &[u8]) {
        let mut buf = [0u8; KEY_SIZE];
        let n = key.len().min(KEY_SIZE);
        buf[..n].copy_from_slice(&key[..n]);
        self.key = load_words(&buf);
        buf.zeroize();
        self.rebuild();
    }

    pub fn set_tweak(&mut self, tweak: &[u8; TWEAK_SIZE]) {
        self.tweak = load_words(tweak);
        self.rebuild();
    }

    pub fn tweak(&self) -> [u64; 2] {
        self.tweak
    }

    fn rebuild(&mut self) {
        self.inner = Some(Threefish1024::new_with_tweak_u64(&self.key, &self.tweak));
    }

    fn schedule(&mut self) -> &Threefish1024 {
        let (key, tweak) = (&self.key, &self.tweak);
        self.inner
            .get_or_insert_with(|| Threefish1024::new_with_tweak_u64(key, tweak))
    }

    pub fn encrypt_block(&mut self, block: &mut Block) {
        let mut words: [u64; BLOCK_WORDS] = load_words(block);
        self.schedule().encrypt_block_u64(&mut words);
        store_words(&words, block);
        words.zeroize();
    }

    pub fn decrypt_block(&mut self, block: &mut Block) {
        let mut words: [u64; BLOCK_WORDS] = load_words(block);
        self.schedule().decrypt_block_u64(&mut words);
        store_words(&words, block);
        words.zeroize();
    }

    /// Encrypt with a one-off tweak, leaving the installed tweak untouched.
    ///
    /// The crate folds the tweak into every subkey and offers no way to swap
    /// it, so each call expands a fresh 21-subkey schedule. TCTR pays this
    /// once per block; `benches/modes.rs` tracks it against a fixed tweak.
    pub fn encrypt_block_tweaked(&self, tweak: [u64; 2], block: &mut Block) {
        let cipher = Threefish1024::new_with_tweak_u64(&self.key, &tweak);
        let mut words: [u64; BLOCK_WORDS] = load_words(block);
        cipher.encrypt_block_u64(&mut words);
        store_words(&words, block);
        words.zeroize();
    }

    pub fn decrypt_block_tweaked(&self, tweak: [u64; 2], block: &mut Block) {
        let cipher = Threefish1024::new_with_tweak_u64(&self.key, &tweak);
        let mut words: [u64; BLOCK_WORDS] = load_words(block);
        cipher.decrypt_block_u64(&mut words);
        store_words(&words, block);
        words.zeroize();
    }
}

/// Raw chaining-value encryption used by the Skein UBI construction.
pub(crate) fn encrypt_words(
    key: &[u64; BLOCK_WORDS],
    tweak: [u64; 2],
    block: &mut [u64; BLOCK_WORDS],
) {
    Threefish1024::new_with_tweak_u64(key, &tweak).encrypt_block_u64(block);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(k: u8) -> BlockCipher {
        let mut c = BlockCipher::new();
        c.set_key(&[k; KEY_SIZE]);
        c.set_tweak(&[0u8; TWEAK_SIZE]);
        c
    }

    #[test]
    fn block_roundtrip() {
        let mut c = keyed(7);
        let orig: Block = core::array::from_fn(|i| i as u8);
        let mut b = orig;
        c.encrypt_block(&mut b);
        assert_ne!(b, orig);
        c.decrypt_block(&mut b);
        assert_eq!(b, orig);
    }

    #[test]
    fn one_off_tweak_matches_installed_tweak() {
        let fixed = keyed(9);
        let tweak = [0x0123_4567_89ab_cdef_u64, u64::MAX - 5];
        let mut bytes = [0u8; TWEAK_SIZE];
        store_words(&tweak, &mut bytes);
        let mut installed = keyed(9);
        installed.set_tweak(&bytes);

        let orig: Block = core::array::from_fn(|i| (i * 3) as u8);
        let (mut a, mut b) = (orig, orig);
        fixed.encrypt_block_tweaked(tweak, &mut a);
        installed.encrypt_block(&mut b);
        assert_eq!(a, b);
        assert_eq!(fixed.tweak(), [0, 0]);
        fixed.decrypt_block_tweaked(tweak, &mut a);
        assert_eq!(a, orig);
    }

    #[test]
    fn tweak_changes_output() {
        let c = keyed(7);
        let mut a = [0u8; BLOCK_SIZE];
        let mut b = [0u8; BLOCK_SIZE];
        c.encrypt_block_tweaked([0, 0], &mut a);
        c.encrypt_block_tweaked([1, 0], &mut b);
        assert_ne!(a, b);
        c.decrypt_block_tweaked([1, 0], &mut b);
        assert_eq!(b, [0u8; BLOCK_SIZE]);
    }

    #[test]
    fn short_key_is_zero_padded() {
        let mut short = BlockCipher::new();
        short.set_key(&[9u8; 16]);
        let mut padded_key = [0u8; KEY_SIZE];
        padded_key[..16].fill(9);
        let mut full = BlockCipher::new();
        full.set_key(&padded_key);

        let mut a = [3u8; BLOCK_SIZE];
        let mut b = [3u8; BLOCK_SIZE];
        short.encrypt_block(&mut a);
        full.encrypt_block(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn word_conversion_is_little_endian() {
        let w: [u64; 2] = load_words(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(w, [1, 256]);
        let mut out = [0u8; 16];
        store_words(&w, &mut out);
        assert_eq!(out[9], 1);
    }
}
