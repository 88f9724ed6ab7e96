//! Integration tests against real files: embedded signatures located by file
//! size, timestamp preservation, in-place overwrite, generation and checksums.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tfc_core::config::SessionConfig;
use tfc_core::types::{BinaryFormat, Direction, IoTarget, KeySource, MacKeySource, MacPolicy, Mode};
use tfc_core::{TfcError, TfcResult};
use tfc_crypto::Verdict;
use tfc_stream::{
    check_list, generate, sum_one, Endpoints, GenerateKind, Progress, Session, SessionOutcome,
    SumOptions, TransferOptions,
};

fn cfg(direction: Direction, policy: MacPolicy) -> SessionConfig {
    SessionConfig {
        mode: Mode::Tctr,
        direction,
        mac_policy: policy,
        mac_key_source: MacKeySource::PrimaryKey,
        key_source: KeySource::Keyfile(IoTarget::Stdio),
        quiet: true,
        ..SessionConfig::default()
    }
}

fn run_files(cfg: SessionConfig, keyfile: &Path, src: &Path, dst: &Path) -> SessionOutcome {
    let mut key = File::open(keyfile).unwrap();
    let mut source = File::open(src).unwrap();
    let mut destination = File::create(dst).unwrap();
    Session::new(cfg)
        .unwrap()
        .run(
            Endpoints {
                key: Some(&mut key),
                ..Endpoints::default()
            },
            &mut source,
            &mut destination,
        )
        .expect("file session should succeed")
}

#[test]
fn file_round_trip_with_embedded_signature() {
    let tmp = TempDir::new().unwrap();
    let keyfile = tmp.path().join("key");
    let plain = tmp.path().join("plain.bin");
    let enc = tmp.path().join("plain.bin.tfc");
    let dec = tmp.path().join("plain.bin.out");
    fs::write(&keyfile, b"a keyfile of arbitrary length").unwrap();
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&plain, &data).unwrap();

    let signed = run_files(
        SessionConfig {
            fsync: true,
            chunk_size: 4096,
            ..cfg(Direction::Encrypt, MacPolicy::Sign)
        },
        &keyfile,
        &plain,
        &enc,
    );
    assert_eq!(signed.report.bytes_written, data.len() as u64 + 128);
    assert_eq!(fs::metadata(&enc).unwrap().len(), data.len() as u64 + 128);

    let checked = run_files(cfg(Direction::Decrypt, MacPolicy::Verify), &keyfile, &enc, &dec);
    assert_eq!(checked.verdict, Some(Verdict::Good));
    assert_eq!(fs::read(&dec).unwrap(), data);
}

#[test]
fn timestamps_are_copied_when_asked() {
    let tmp = TempDir::new().unwrap();
    let keyfile = tmp.path().join("key");
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    fs::write(&keyfile, b"k").unwrap();
    fs::write(&src, b"timestamp me").unwrap();
    let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    OpenOptions::new()
        .write(true)
        .open(&src)
        .unwrap()
        .set_modified(past)
        .unwrap();

    run_files(
        SessionConfig {
            preserve_timestamps: true,
            ..cfg(Direction::Encrypt, MacPolicy::None)
        },
        &keyfile,
        &src,
        &dst,
    );
    assert_eq!(fs::metadata(&dst).unwrap().modified().unwrap(), past);
}

#[test]
fn overwrite_in_place() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("inplace");
    let data = vec![0x33u8; 10_000];
    fs::write(&path, &data).unwrap();

    let pass = |direction| {
        let mut key = &[1u8; 128][..];
        let mut source = File::open(&path).unwrap();
        let mut destination = OpenOptions::new().write(true).open(&path).unwrap();
        Session::new(SessionConfig {
            direction,
            key_source: KeySource::Raw(IoTarget::Stdio),
            overwrite_source: true,
            quiet: true,
            ..SessionConfig::default()
        })
        .unwrap()
        .run(
            Endpoints {
                key: Some(&mut key),
                ..Endpoints::default()
            },
            &mut source,
            &mut destination,
        )
        .unwrap();
    };

    pass(Direction::Encrypt);
    let encrypted = fs::read(&path).unwrap();
    assert_eq!(encrypted.len(), data.len());
    assert_ne!(encrypted, data);
    pass(Direction::Decrypt);
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn generated_file_has_requested_size() {
    let tmp = TempDir::new().unwrap();
    for (kind, name) in [(GenerateKind::Random, "rnd"), (GenerateKind::Zero, "zero")] {
        let path = tmp.path().join(name);
        let mut out = File::create(&path).unwrap();
        let progress = Progress::default();
        let report = generate(
            &mut out,
            70_001,
            kind,
            Mode::Cbc,
            &TransferOptions::default(),
            &CancellationToken::new(),
            &progress,
            None,
        )
        .unwrap();
        assert_eq!(report.bytes_written, 70_001);
        assert_eq!(progress.bytes_written(), 70_001);
        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), 70_001);
        if kind == GenerateKind::Zero {
            assert!(written.iter().all(|&b| b == 0));
        }
    }
}

#[test]
fn sum_then_check_files() {
    let tmp = TempDir::new().unwrap();
    let names = ["one", "two", "three"];
    for (i, n) in names.iter().enumerate() {
        fs::write(tmp.path().join(n), vec![i as u8; 1000 * (i + 1)]).unwrap();
    }
    let opts = SumOptions {
        bits: 384,
        format: BinaryFormat::Hex,
        ..SumOptions::default()
    };
    let mut list = Vec::new();
    for n in names {
        let mut f = File::open(tmp.path().join(n)).unwrap();
        sum_one(&mut f, n, &opts, None, &mut list).unwrap();
    }
    fs::write(tmp.path().join("two"), b"changed").unwrap();

    let dir = tmp.path().to_path_buf();
    let open = |name: &str| -> TfcResult<Box<dyn Read>> {
        File::open(dir.join(name))
            .map(|f| Box::new(f) as Box<dyn Read>)
            .map_err(|e| TfcError::io(name.to_string(), e))
    };
    let mut out = Vec::new();
    let report = check_list(&mut BufReader::new(&list[..]), open, &opts, None, &mut out).unwrap();
    assert_eq!(report.ok, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "one: OK\ntwo: FAILED\nthree: OK\n"
    );

    let wrong_width = SumOptions { bits: 256, ..opts };
    let report = check_list(
        &mut BufReader::new(&list[..]),
        open,
        &wrong_width,
        None,
        &mut Vec::new(),
    )
    .unwrap();
    assert_eq!(report.ok, 0);
    assert_eq!(report.exit_code(), 1);
}
