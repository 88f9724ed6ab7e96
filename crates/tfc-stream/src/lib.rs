//! tfc-stream: the streaming half of tfcrypt
//!
//! - `endpoint`: `Input`/`Output` traits over files, stdio and memory
//! - `transfer`: the chunked read → process → write loop
//! - `session`: one encrypt/decrypt/copy run, including the MAC protocol
//! - `generate`: random and zero streams
//! - `armor`: base64 encode/decode streams
//! - `bench`: timed in-memory cipher throughput
//! - `sum`: Skein checksums and list checking
//! - `progress`: running totals and the status line

pub mod armor;
pub mod bench;
pub mod encoding;
pub mod endpoint;
pub mod generate;
pub mod progress;
pub mod session;
pub mod sum;
pub mod transfer;

pub use armor::base64_stream;
pub use bench::{benchmark, BenchOptions, BenchReport};
pub use endpoint::{Input, Output, Pipe};
pub use generate::{generate, GenerateKind};
pub use progress::{Progress, StatusControl, StatusReporter};
pub use session::{Endpoints, Session, SessionOutcome};
pub use sum::{check_list, sum_one, CheckReport, SumOptions};
pub use transfer::{transfer, ChunkProcessor, Emit, TransferOptions, TransferReport};
