//! Random material from the operating system.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use tfc_core::types::Mode;
use tfc_core::{TfcError, TfcResult, KEY_SIZE, TWEAK_SIZE};

use crate::mode::ModeEngine;

pub fn fill_random(buf: &mut [u8]) -> TfcResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| TfcError::Cipher(format!("random source is required: {e}")))
}

pub fn random_counter(len: usize) -> TfcResult<Zeroizing<Vec<u8>>> {
    let mut ctr = Zeroizing::new(vec![0u8; len]);
    fill_random(&mut ctr)?;
    Ok(ctr)
}

/// Engine with random key, tweak and counter, ready to encrypt.
pub fn random_engine(mode: Mode) -> TfcResult<ModeEngine> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    let mut tweak = Zeroizing::new([0u8; TWEAK_SIZE]);
    fill_random(&mut key[..])?;
    fill_random(&mut tweak[..])?;
    let mut engine = ModeEngine::new(mode);
    engine.set_key(&key[..]);
    engine.set_tweak(&tweak);
    let ctr = random_counter(engine.counter_len())?;
    engine.start_counter(&ctr)?;
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfc_core::types::Direction;

    #[test]
    fn random_counters_differ() {
        let a = random_counter(128).unwrap();
        let b = random_counter(128).unwrap();
        assert_ne!(a[..], b[..]);
    }

    #[test]
    fn random_engine_is_started() {
        let mut e = random_engine(Mode::Tctr).unwrap();
        let mut out = [0u8; 200];
        e.transform(Direction::Encrypt, &[0u8; 200], &mut out).unwrap();
        assert!(out.iter().any(|&b| b != 0));
    }
}
