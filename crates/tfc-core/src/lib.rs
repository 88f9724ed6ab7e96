//! tfc-core: shared types, configuration, errors and I/O policy for tfcrypt
//!
//! - `types`: modes, MAC policies, key/counter sources, error actions
//! - `config`: TOML defaults file and the validated session configuration
//! - `size`: size specifier parsing (`4K`, `3e`, `cbs`, file sizes)
//! - `io`: read/write retry combinator driven by the error-action policy

pub mod config;
pub mod error;
pub mod io;
pub mod size;
pub mod types;

pub use error::{TfcError, TfcResult};

/// Threefish-1024 block size in bytes.
pub const BLOCK_SIZE: usize = 128;

/// Maximum key width in bytes (equal to the block size for Threefish-1024).
pub const KEY_SIZE: usize = 128;

/// Maximum key / digest width in bits.
pub const MAX_BITS: u32 = (KEY_SIZE * 8) as u32;

/// Threefish tweak width in bytes.
pub const TWEAK_SIZE: usize = 16;

/// Default transfer chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Literal tag that prefixes an ASCII (base64) detached signature.
pub const ASCII_MAC_TAG: &[u8; 4] = b"%MAC";
