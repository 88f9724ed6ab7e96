//! Cipher-mode engine: CTR, tweakable CTR and CBC over Threefish-1024.
//!
//! Every mode handles a short final block without padding, so output length
//! always equals input length:
//!
//! * CTR: keystream block `E(counter)`, counter advanced before each block.
//! * TCTR: each block is enciphered under tweak `session tweak + counter`;
//!   a short tail is XORed with `E_tweak(0)`.
//! * CBC: classic chaining on the IV; a short tail is XORed with `E(iv)`,
//!   which becomes the new IV.

use tracing::debug;
use zeroize::Zeroize;

use tfc_core::types::{Direction, Mode};
use tfc_core::{TfcError, TfcResult, BLOCK_SIZE, TWEAK_SIZE};

use crate::threefish::{Block, BlockCipher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    KeyedAndTweaked,
    CounterStarted,
    Active,
}

/// Little-endian add of `n` into a multi-byte counter, wrapping at its width.
pub fn counter_add(ctr: &mut [u8], n: u64) {
    let mut carry = n as u128;
    for b in ctr.iter_mut() {
        if carry == 0 {
            break;
        }
        let sum = *b as u128 + (carry & 0xff);
        *b = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
}

pub struct ModeEngine {
    mode: Mode,
    cipher: BlockCipher,
    keyed: bool,
    tweaked: bool,
    counter: Block,
    state: EngineState,
}

impl Drop for ModeEngine {
    fn drop(&mut self) {
        self.counter.zeroize();
    }
}

impl std::fmt::Debug for ModeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeEngine")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("counter", &"[REDACTED]")
            .finish()
    }
}

impl ModeEngine {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            cipher: BlockCipher::new(),
            keyed: false,
            tweaked: false,
            counter: [0; BLOCK_SIZE],
            state: EngineState::Uninitialized,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Counter width in bytes for this mode.
    pub fn counter_len(&self) -> usize {
        match self.mode {
            Mode::Tctr => TWEAK_SIZE,
            _ => BLOCK_SIZE,
        }
    }

    /// Current counter (or CBC chaining value).
    pub fn counter(&self) -> &[u8] {
        &self.counter[..self.counter_len()]
    }

    pub fn set_key(&mut self, key: &[u8]) {
        self.cipher.set_key(key);
        self.keyed = true;
        self.settle();
    }

    pub fn set_tweak(&mut self, tweak: &[u8; TWEAK_SIZE]) {
        self.cipher.set_tweak(tweak);
        self.tweaked = true;
        self.settle();
    }

    fn settle(&mut self) {
        if self.keyed && self.tweaked && self.state == EngineState::Uninitialized {
            self.state = EngineState::KeyedAndTweaked;
        }
    }

    /// Load the starting counter / IV. Shorter input is zero-extended.
    pub fn start_counter(&mut self, initial: &[u8]) -> TfcResult<()> {
        if self.state == EngineState::Uninitialized {
            return Err(TfcError::Cipher(
                "counter started before key and tweak".into(),
            ));
        }
        let len = self.counter_len();
        if initial.len() > len {
            return Err(TfcError::Cipher(format!(
                "counter is {} bytes, expected at most {len}",
                initial.len()
            )));
        }
        self.counter.zeroize();
        self.counter[..initial.len()].copy_from_slice(initial);
        self.state = EngineState::CounterStarted;
        Ok(())
    }

    /// Advance the counter by `n_blocks` without producing output.
    pub fn rewind(&mut self, n_blocks: u64) -> TfcResult<()> {
        if self.mode == Mode::Cbc {
            return Err(TfcError::Cipher("CBC mode cannot be rewound".into()));
        }
        self.ensure_started()?;
        let len = self.counter_len();
        counter_add(&mut self.counter[..len], n_blocks);
        debug!(blocks = n_blocks, "counter rewound");
        Ok(())
    }

    fn ensure_started(&self) -> TfcResult<()> {
        match self.state {
            EngineState::CounterStarted | EngineState::Active => Ok(()),
            _ => Err(TfcError::Cipher("transform before counter start".into())),
        }
    }

    /// Transform `input` into `output` (same length, any length).
    pub fn transform(
        &mut self,
        direction: Direction,
        input: &[u8],
        output: &mut [u8],
    ) -> TfcResult<()> {
        if input.len() != output.len() {
            return Err(TfcError::Cipher(format!(
                "buffer length mismatch ({} vs {})",
                input.len(),
                output.len()
            )));
        }
        if self.mode == Mode::Plain {
            output.copy_from_slice(input);
            return Ok(());
        }
        self.ensure_started()?;
        self.state = EngineState::Active;

        let mut block: Block = [0; BLOCK_SIZE];
        for (src, dst) in input.chunks(BLOCK_SIZE).zip(output.chunks_mut(BLOCK_SIZE)) {
            match (self.mode, direction, src.len() == BLOCK_SIZE) {
                (Mode::Ctr, _, _) => self.ctr_block(src, dst, &mut block),
                (Mode::Tctr, dir, true) => self.tctr_block(dir, src, dst, &mut block),
                (Mode::Tctr, _, false) => self.tctr_tail(src, dst, &mut block),
                (Mode::Cbc, Direction::Encrypt, true) => self.cbc_encrypt(src, dst, &mut block),
                (Mode::Cbc, Direction::Decrypt, true) => self.cbc_decrypt(src, dst, &mut block),
                (Mode::Cbc, _, false) => self.cbc_tail(src, dst, &mut block),
                (Mode::Plain, _, _) => dst.copy_from_slice(src),
            }
        }
        block.zeroize();
        Ok(())
    }

    /// In-place variant of [`transform`](Self::transform).
    pub fn transform_in_place(&mut self, direction: Direction, buf: &mut [u8]) -> TfcResult<()> {
        let input = buf.to_vec();
        let res = self.transform(direction, &input, buf);
        let mut input = input;
        input.zeroize();
        res
    }

    fn ctr_block(&mut self, src: &[u8], dst: &mut [u8], ks: &mut Block) {
        counter_add(&mut self.counter, 1);
        *ks = self.counter;
        self.cipher.encrypt_block(ks);
        xor_into(src, ks, dst);
    }

    fn block_tweak(&mut self) -> [u64; 2] {
        counter_add(&mut self.counter[..TWEAK_SIZE], 1);
        let mut ctr = [0u8; TWEAK_SIZE];
        ctr.copy_from_slice(&self.counter[..TWEAK_SIZE]);
        let c = u128::from_le_bytes(ctr);
        let [t0, t1] = self.cipher.tweak();
        let t = ((t1 as u128) << 64 | t0 as u128).wrapping_add(c);
        [t as u64, (t >> 64) as u64]
    }

    fn tctr_block(&mut self, dir: Direction, src: &[u8], dst: &mut [u8], buf: &mut Block) {
        let tweak = self.block_tweak();
        buf.copy_from_slice(src);
        match dir {
            Direction::Encrypt => self.cipher.encrypt_block_tweaked(tweak, buf),
            Direction::Decrypt => self.cipher.decrypt_block_tweaked(tweak, buf),
        }
        dst.copy_from_slice(buf);
    }

    fn tctr_tail(&mut self, src: &[u8], dst: &mut [u8], ks: &mut Block) {
        let tweak = self.block_tweak();
        ks.fill(0);
        self.cipher.encrypt_block_tweaked(tweak, ks);
        xor_into(src, ks, dst);
    }

    fn cbc_encrypt(&mut self, src: &[u8], dst: &mut [u8], buf: &mut Block) {
        for ((b, s), iv) in buf.iter_mut().zip(src).zip(self.counter.iter()) {
            *b = s ^ iv;
        }
        self.cipher.encrypt_block(buf);
        self.counter = *buf;
        dst.copy_from_slice(buf);
    }

    fn cbc_decrypt(&mut self, src: &[u8], dst: &mut [u8], buf: &mut Block) {
        buf.copy_from_slice(src);
        self.cipher.decrypt_block(buf);
        for ((d, b), iv) in dst.iter_mut().zip(buf.iter()).zip(self.counter.iter()) {
            *d = b ^ iv;
        }
        self.counter.copy_from_slice(src);
    }

    fn cbc_tail(&mut self, src: &[u8], dst: &mut [u8], ks: &mut Block) {
        *ks = self.counter;
        self.cipher.encrypt_block(ks);
        self.counter = *ks;
        xor_into(src, ks, dst);
    }
}

fn xor_into(src: &[u8], ks: &[u8], dst: &mut [u8]) {
    for ((d, s), k) in dst.iter_mut().zip(src).zip(ks) {
        *d = s ^ k;
    }
}
