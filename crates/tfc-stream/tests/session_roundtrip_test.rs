//! Integration tests for encrypt/decrypt sessions over in-memory streams.
//!
//! Covers round trips in every mode, byte accounting, key sources, counter
//! sources, and seeking with and without counter adjustment.

use std::collections::VecDeque;
use std::io::Cursor;

use proptest::prelude::*;
use secrecy::SecretString;

use tfc_core::config::SessionConfig;
use tfc_core::types::{
    CounterSource, Direction, IoTarget, KeySource, Mode, SeekRequest, TweakSource,
};
use tfc_core::{TfcError, TfcResult};
use tfc_crypto::PasswordPrompt;
use tfc_stream::{Endpoints, Pipe, Session, SessionOutcome};

const KEY: [u8; 128] = [0x5a; 128];

fn raw(mode: Mode, direction: Direction) -> SessionConfig {
    SessionConfig {
        mode,
        direction,
        key_source: KeySource::Raw(IoTarget::Stdio),
        quiet: true,
        ..SessionConfig::default()
    }
}

fn run(cfg: SessionConfig, data: &[u8]) -> (Vec<u8>, SessionOutcome) {
    let mut key = &KEY[..];
    let mut out = Vec::new();
    let outcome = Session::new(cfg)
        .expect("valid config")
        .run(
            Endpoints {
                key: Some(&mut key),
                ..Endpoints::default()
            },
            &mut Cursor::new(data.to_vec()),
            &mut out,
        )
        .expect("session should succeed");
    (out, outcome)
}

fn message(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

struct Script(VecDeque<&'static str>);

impl PasswordPrompt for Script {
    fn prompt(&mut self, _message: &str) -> TfcResult<SecretString> {
        self.0
            .pop_front()
            .map(|s| SecretString::from(s.to_string()))
            .ok_or(TfcError::Cancelled)
    }
}

fn with_password(cfg: SessionConfig, answers: &[&'static str], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    Session::new(cfg)
        .unwrap()
        .with_prompt(Box::new(Script(answers.iter().copied().collect())))
        .run(Endpoints::default(), &mut Cursor::new(data.to_vec()), &mut out)
        .unwrap();
    out
}

// ── round trips ───────────────────────────────────────────────────────────────

#[test]
fn seventy_byte_ctr_message() {
    let msg = message(70);
    let (ct, o) = run(raw(Mode::Ctr, Direction::Encrypt), &msg);
    assert_eq!(ct.len(), 70);
    assert_ne!(ct, msg);
    assert_eq!(o.report.bytes_read, 70);
    assert_eq!(o.report.bytes_written, 70);
    let (pt, _) = run(raw(Mode::Ctr, Direction::Decrypt), &ct);
    assert_eq!(pt, msg);
}

#[test]
fn ctr_is_self_inverse() {
    let msg = message(1000);
    let (ct, _) = run(raw(Mode::Ctr, Direction::Encrypt), &msg);
    let (again, _) = run(raw(Mode::Ctr, Direction::Encrypt), &ct);
    assert_eq!(again, msg);
}

#[test]
fn tctr_and_cbc_are_not_self_inverse() {
    let msg = message(300);
    for mode in [Mode::Tctr, Mode::Cbc] {
        let (ct, _) = run(raw(mode, Direction::Encrypt), &msg);
        let (again, _) = run(raw(mode, Direction::Encrypt), &ct);
        assert_ne!(again, msg, "{mode}");
        let (pt, _) = run(raw(mode, Direction::Decrypt), &ct);
        assert_eq!(pt, msg, "{mode}");
    }
}

#[test]
fn plain_mode_copies_and_accounts() {
    let msg = message(5000);
    let cfg = SessionConfig {
        mode: Mode::Plain,
        chunk_size: 700,
        quiet: true,
        ..SessionConfig::default()
    };
    let mut out = Vec::new();
    let o = Session::new(cfg)
        .unwrap()
        .run(Endpoints::default(), &mut Cursor::new(msg.clone()), &mut out)
        .unwrap();
    assert_eq!(out, msg);
    assert_eq!(o.report.bytes_read, o.report.bytes_written);
    assert_eq!(o.exit_code(), 0);
}

#[test]
fn padding_writes_whole_blocks() {
    let msg = message(200);
    let cfg = SessionConfig {
        pad_final_block: true,
        ..raw(Mode::Cbc, Direction::Encrypt)
    };
    let (ct, o) = run(cfg, &msg);
    assert_eq!(ct.len(), 256);
    assert_eq!(o.report.bytes_read, 200);
    let (pt, _) = run(raw(Mode::Cbc, Direction::Decrypt), &ct);
    assert_eq!(&pt[..200], &msg[..]);
    assert!(pt[200..].iter().all(|&b| b == 0));
}

fn mode_strategy() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::Ctr), Just(Mode::Tctr), Just(Mode::Cbc)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn round_trip_any_length_and_chunking(
        data in proptest::collection::vec(any::<u8>(), 0..900),
        mode in mode_strategy(),
        enc_chunk in 1usize..600,
        dec_chunk in 1usize..600,
    ) {
        let (ct, o) = run(SessionConfig { chunk_size: enc_chunk, ..raw(mode, Direction::Encrypt) }, &data);
        prop_assert_eq!(ct.len(), data.len());
        prop_assert_eq!(o.report.bytes_written, data.len() as u64);
        let (pt, _) = run(SessionConfig { chunk_size: dec_chunk, ..raw(mode, Direction::Decrypt) }, &ct);
        prop_assert_eq!(pt, data);
    }
}

// ── keys ──────────────────────────────────────────────────────────────────────

#[test]
fn password_passes_are_deterministic_and_distinct() {
    let msg = message(256);
    let cfg = |passes| SessionConfig {
        passes,
        quiet: true,
        ..SessionConfig::default()
    };
    let one = with_password(cfg(1), &["pw", "pw"], &msg);
    let two = with_password(cfg(2), &["pw", "pw"], &msg);
    let two_again = with_password(cfg(2), &["pw", "pw"], &msg);
    let three = with_password(cfg(3), &["pw", "pw"], &msg);
    assert_eq!(two, two_again);
    assert_ne!(one, two);
    assert_ne!(two, three);
}

#[test]
fn exported_key_works_as_raw_key() {
    let msg = message(400);
    let cfg = SessionConfig {
        passes: 3,
        key_bits: 512,
        quiet: true,
        ..SessionConfig::default()
    };

    let mut exported = Vec::new();
    let mut out = Vec::new();
    let o = Session::new(cfg.clone())
        .unwrap()
        .with_prompt(Box::new(Script(["secret", "secret"].into_iter().collect())))
        .run(
            Endpoints {
                key_out: Some(&mut exported),
                ..Endpoints::default()
            },
            &mut Cursor::new(msg.clone()),
            &mut out,
        )
        .unwrap();
    assert!(o.key_exported);
    assert!(out.is_empty());
    assert_eq!(exported.len(), 64);

    let by_password = with_password(cfg, &["secret", "secret"], &msg);
    let mut key = &exported[..];
    let mut by_raw = Vec::new();
    Session::new(SessionConfig {
        key_bits: 512,
        ..raw(Mode::Ctr, Direction::Encrypt)
    })
    .unwrap()
    .run(
        Endpoints {
            key: Some(&mut key),
            ..Endpoints::default()
        },
        &mut Cursor::new(msg),
        &mut by_raw,
    )
    .unwrap();
    assert_eq!(by_password, by_raw);
}

#[test]
fn short_raw_key_is_fatal() {
    let mut key = &KEY[..10];
    let err = Session::new(raw(Mode::Ctr, Direction::Encrypt))
        .unwrap()
        .run(
            Endpoints {
                key: Some(&mut key),
                ..Endpoints::default()
            },
            &mut Cursor::new(message(10)),
            &mut Vec::new(),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "rawkey too small! (10 of 128 bytes)");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn keyfile_limit_changes_key() {
    let msg = message(128);
    let keyfile = vec![9u8; 3000];
    let encrypt = |limit| {
        let mut kf = &keyfile[..];
        let mut out = Vec::new();
        Session::new(SessionConfig {
            key_source: KeySource::Keyfile(IoTarget::Stdio),
            keyfile_limit: limit,
            quiet: true,
            ..SessionConfig::default()
        })
        .unwrap()
        .run(
            Endpoints {
                key: Some(&mut kf),
                ..Endpoints::default()
            },
            &mut Cursor::new(msg.clone()),
            &mut out,
        )
        .unwrap();
        out
    };
    assert_ne!(encrypt(None), encrypt(Some(100)));
    assert_eq!(encrypt(Some(3000)), encrypt(None));
}

#[test]
fn tweak_sources_change_ciphertext() {
    let msg = message(300);
    let (builtin, _) = run(raw(Mode::Tctr, Direction::Encrypt), &msg);
    let (secret, _) = run(
        SessionConfig {
            tweak: TweakSource::Secret,
            ..raw(Mode::Tctr, Direction::Encrypt)
        },
        &msg,
    );
    assert_ne!(builtin, secret);

    let mut key = &KEY[..];
    let mut tweak = &[7u8; 16][..];
    let mut from_file = Vec::new();
    Session::new(SessionConfig {
        tweak: TweakSource::File(IoTarget::Stdio),
        ..raw(Mode::Tctr, Direction::Encrypt)
    })
    .unwrap()
    .run(
        Endpoints {
            key: Some(&mut key),
            tweak: Some(&mut tweak),
            ..Endpoints::default()
        },
        &mut Cursor::new(msg),
        &mut from_file,
    )
    .unwrap();
    assert_ne!(from_file, builtin);
    assert_ne!(from_file, secret);
}

// ── counters ──────────────────────────────────────────────────────────────────

#[test]
fn random_counter_travels_in_stream_head() {
    let msg = message(500);
    for mode in [Mode::Ctr, Mode::Tctr, Mode::Cbc] {
        let head = if mode == Mode::Tctr { 16 } else { 128 };
        let (ct, o) = run(
            SessionConfig {
                counter_source: CounterSource::Random,
                ..raw(mode, Direction::Encrypt)
            },
            &msg,
        );
        assert_eq!(ct.len(), head + msg.len(), "{mode}");
        assert_eq!(o.report.bytes_written, (head + msg.len()) as u64);

        let (pt, o) = run(
            SessionConfig {
                counter_source: CounterSource::StreamHead,
                ..raw(mode, Direction::Decrypt)
            },
            &ct,
        );
        assert_eq!(pt, msg, "{mode}");
        assert_eq!(o.report.bytes_read, ct.len() as u64);
    }
}

#[test]
fn counter_file_must_be_complete() {
    let run_with = |ctr: &[u8]| {
        let mut key = &KEY[..];
        let mut counter = ctr;
        Session::new(SessionConfig {
            counter_source: CounterSource::File(IoTarget::Stdio),
            ..raw(Mode::Ctr, Direction::Encrypt)
        })
        .unwrap()
        .run(
            Endpoints {
                key: Some(&mut key),
                counter: Some(&mut counter),
                ..Endpoints::default()
            },
            &mut Cursor::new(message(64)),
            &mut Vec::new(),
        )
    };
    assert!(run_with(&[1u8; 128]).is_ok());
    assert!(matches!(
        run_with(&[1u8; 100]),
        Err(TfcError::ShortSource { got: 100, need: 128, .. })
    ));
}

#[test]
fn show_counter_prints_hex() {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Console(Arc<Mutex<Vec<u8>>>);
    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let console = Console::default();
    let mut key = &KEY[..];
    Session::new(SessionConfig {
        show_counter: true,
        quiet: false,
        ..raw(Mode::Tctr, Direction::Encrypt)
    })
    .unwrap()
    .with_console(Box::new(console.clone()))
    .run(
        Endpoints {
            key: Some(&mut key),
            ..Endpoints::default()
        },
        &mut Cursor::new(vec![]),
        &mut Vec::new(),
    )
    .unwrap();
    let text = String::from_utf8(console.0.lock().unwrap().clone()).unwrap();
    let hex = text.trim_end().strip_prefix("CTR: ").unwrap();
    assert_eq!(hex.len(), 32);
}

// ── seeking ───────────────────────────────────────────────────────────────────

#[test]
fn adjusting_seek_resumes_mid_stream() {
    let msg = message(1024);
    for mode in [Mode::Ctr, Mode::Tctr] {
        let (ct, _) = run(raw(mode, Direction::Encrypt), &msg);

        let (tail, _) = run(
            SessionConfig {
                source_seek: Some(SeekRequest {
                    offset: 256,
                    adjust_counter: true,
                }),
                ..raw(mode, Direction::Decrypt)
            },
            &ct,
        );
        assert_eq!(tail, &msg[256..], "{mode}");

        let (raw_seek, _) = run(
            SessionConfig {
                source_seek: Some(SeekRequest {
                    offset: 256,
                    adjust_counter: false,
                }),
                ..raw(mode, Direction::Decrypt)
            },
            &ct,
        );
        assert_eq!(raw_seek.len(), 768);
        assert_ne!(raw_seek, &msg[256..], "{mode}");

        let (advanced, _) = run(
            SessionConfig {
                ctr_blocks: 2,
                ..raw(mode, Direction::Decrypt)
            },
            &ct[256..],
        );
        assert_eq!(advanced, &msg[256..], "{mode}");

        let (by_bytes, _) = run(
            SessionConfig {
                ctr_bytes: 256,
                ..raw(mode, Direction::Decrypt)
            },
            &ct[256..],
        );
        assert_eq!(by_bytes, &msg[256..], "{mode}");
    }
}

#[test]
fn seek_in_pipe_skips_by_reading() {
    let msg = message(640);
    let (ct, _) = run(raw(Mode::Ctr, Direction::Encrypt), &msg);
    let mut key = &KEY[..];
    let mut out = Vec::new();
    let o = Session::new(SessionConfig {
        source_seek: Some(SeekRequest {
            offset: 384,
            adjust_counter: true,
        }),
        ..raw(Mode::Ctr, Direction::Decrypt)
    })
    .unwrap()
    .run(
        Endpoints {
            key: Some(&mut key),
            ..Endpoints::default()
        },
        &mut Pipe(&ct[..]),
        &mut out,
    )
    .unwrap();
    assert_eq!(out, &msg[384..]);
    assert_eq!(o.report.bytes_read, 256);
}

#[test]
fn cbc_rejects_counter_seeking() {
    let cfg = SessionConfig {
        source_seek: Some(SeekRequest {
            offset: 128,
            adjust_counter: true,
        }),
        ..raw(Mode::Cbc, Direction::Decrypt)
    };
    assert!(Session::new(cfg).is_err());
}

#[test]
fn destination_seek_keeps_prefix() {
    let msg = message(100);
    let mut key = &KEY[..];
    let mut dest = Cursor::new(vec![0xEEu8; 50]);
    Session::new(SessionConfig {
        destination_seek: 50,
        ..raw(Mode::Ctr, Direction::Encrypt)
    })
    .unwrap()
    .run(
        Endpoints {
            key: Some(&mut key),
            ..Endpoints::default()
        },
        &mut Cursor::new(msg.clone()),
        &mut dest,
    )
    .unwrap();
    let written = dest.into_inner();
    assert_eq!(written.len(), 150);
    assert_eq!(&written[..50], &[0xEEu8; 50][..]);
    let (expected, _) = run(raw(Mode::Ctr, Direction::Encrypt), &msg);
    assert_eq!(&written[50..], &expected[..]);
}

#[test]
fn max_bytes_limits_the_run() {
    let msg = message(1000);
    let (ct, o) = run(
        SessionConfig {
            max_bytes: Some(300),
            ..raw(Mode::Ctr, Direction::Encrypt)
        },
        &msg,
    );
    assert_eq!(ct.len(), 300);
    assert_eq!(o.report.bytes_read, 300);
}
