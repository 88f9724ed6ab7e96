//! tfc-crypto: the cryptographic half of tfcrypt
//!
//! Primitives: Threefish-1024 (via the `threefish` crate) and Skein-1024
//! built from it. On top of those:
//!
//! ```text
//! password / keyfile / raw key ──► kdf ──► key ─┬─► ModeEngine (CTR | TCTR | CBC)
//!                                               ├─► counter  (hash of key, or supplied)
//!                                               └─► tweak    (built-in, file, or hash of key)
//! MAC key ──► Authenticator ──► digest ──► ModeEngine ──► signature
//! ```

pub mod kdf;
pub mod mac;
pub mod mode;
pub mod random;
pub mod skein;
pub mod threefish;

pub use kdf::{DerivedKey, PasswordPrompt, DEFAULT_TWEAK};
pub use mac::{decode_signature, encode_signature, Authenticator, Verdict};
pub use mode::{EngineState, ModeEngine};
pub use random::{fill_random, random_engine};
pub use skein::{digest, MacKey, MacKeyHasher, Skein};
