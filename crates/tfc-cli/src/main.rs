//! tfcrypt: Threefish-1024 stream encryption with Skein MACs
//!
//! Commands:
//!   encrypt [SRC] [DST]   - encrypt (and optionally sign) a file or pipe
//!   decrypt [SRC] [DST]   - decrypt (and optionally verify) a file or pipe
//!   plain   [SRC] [DST]   - copy through the same I/O engine, no crypto
//!   sum     [FILES...]    - Skein checksums, or `--check LIST`
//!   gen     SIZE [DST]    - random or zero stream of a given size
//!   base64  [SRC] [DST]   - base64 encode, or decode with `-d`
//!   bench   [SECONDS]     - in-memory cipher throughput
//!
//! Exit status: 0 success, 1 bad signature / tolerated I/O errors /
//! interruption, 2 any other failure.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tfc_core::config::{SessionConfig, TfcConfig};
use tfc_core::size::{human_bytes, parse_size, SizeContext};
use tfc_core::types::{
    BinaryFormat, CounterSource, Direction, ErrorAction, IoTarget, KeySource, MacKeySource,
    MacLocation, MacPolicy, Mode, SeekRequest, SizeUnits, TweakSource,
};
use tfc_core::{TfcError, TfcResult, BLOCK_SIZE};
use tfc_crypto::kdf::{mac_key_from_password, mac_key_from_reader, PasswordPrompt};
use tfc_crypto::MacKey;
use tfc_stream::{
    base64_stream, benchmark, check_list, generate, sum_one, BenchOptions, Endpoints,
    GenerateKind, Input, Output, Progress, Session, StatusControl, StatusReporter, SumOptions,
    TransferOptions,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tfcrypt",
    version,
    about = "Threefish-1024 stream encryption with Skein MACs",
    long_about = "tfcrypt: encrypt, decrypt, sign and verify files or pipes with Threefish-1024 in CTR, TCTR or CBC mode"
)]
struct Cli {
    /// Path to the defaults file
    #[arg(
        long,
        short = 'c',
        env = "TFC_CONFIG",
        default_value = "~/.config/tfcrypt/config.toml"
    )]
    config: PathBuf,

    /// Print nothing but fatal errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// More log output (repeat for debug)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// 1000-based size suffixes and status output
    #[arg(long, global = true)]
    si: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt SRC into DST
    Encrypt(CryptArgs),

    /// Decrypt SRC into DST
    Decrypt(CryptArgs),

    /// Copy SRC into DST with the transfer engine only
    Plain(CryptArgs),

    /// Print or check Skein checksums
    Sum(SumArgs),

    /// Generate SIZE bytes of random (or zero) data
    Gen(GenArgs),

    /// Base64-encode SRC into DST, or decode it
    Base64(Base64Args),

    /// Measure cipher throughput in memory
    Bench(BenchArgs),
}

#[derive(Args, Debug, Default)]
struct CryptArgs {
    /// Source, `-` for stdin
    #[arg(default_value = "-")]
    source: String,

    /// Destination, `-` for stdout
    #[arg(default_value = "-")]
    destination: String,

    // ── cipher ─────────────────────────────────────────────────────────────────
    /// Mode of operation: ctr, tctr or cbc
    #[arg(long, short = 'm')]
    mode: Option<String>,

    /// Key width in bits
    #[arg(long, short = 'b')]
    bits: Option<u32>,

    /// Key stretching passes
    #[arg(long, short = 'p')]
    passes: Option<u32>,

    /// Read exactly bits/8 raw key bytes from FILE
    #[arg(long, short = 'r', value_name = "FILE", conflicts_with = "keyfile")]
    rawkey: Option<String>,

    /// Hash FILE into the key
    #[arg(long, short = 'k', value_name = "FILE")]
    keyfile: Option<String>,

    /// Hash at most SIZE bytes of the keyfile
    #[arg(long, value_name = "SIZE")]
    keyfile_limit: Option<String>,

    /// Do not key the keyfile hash with the MAC key
    #[arg(long)]
    unbound_keyfile: bool,

    /// Write the derived key to FILE and stop
    #[arg(long, short = 'K', value_name = "FILE")]
    export_key: Option<String>,

    /// Derive the tweak from the key
    #[arg(long)]
    secret_tweak: bool,

    /// Read the 16-byte tweak from FILE
    #[arg(long, value_name = "FILE")]
    tweak_file: Option<String>,

    // ── counter ────────────────────────────────────────────────────────────────
    /// Counter source: derived, head, rand, or a FILE
    #[arg(long, value_name = "SOURCE")]
    counter: Option<String>,

    /// Print the starting counter
    #[arg(long)]
    show_counter: bool,

    /// Advance the counter by SIZE blocks
    #[arg(long, value_name = "SIZE")]
    ctr_blocks: Option<String>,

    /// Advance the counter by SIZE bytes (a block multiple)
    #[arg(long, value_name = "SIZE")]
    ctr_bytes: Option<String>,

    // ── MAC ────────────────────────────────────────────────────────────────────
    /// Sign the plaintext
    #[arg(long, short = 'S')]
    sign: bool,

    /// Verify the signature
    #[arg(long, short = 'M', conflicts_with_all = ["sign", "verify_only", "drop_mac"])]
    verify: bool,

    /// Verify the signature without writing plaintext
    #[arg(long, conflicts_with_all = ["sign", "drop_mac"])]
    verify_only: bool,

    /// Strip an embedded signature without checking it
    #[arg(long, conflicts_with = "sign")]
    drop_mac: bool,

    /// MAC width in bits
    #[arg(long)]
    mac_bits: Option<u32>,

    /// Keep the signature in FILE instead of the data stream
    #[arg(long, value_name = "FILE")]
    mac_file: Option<String>,

    /// MAC key: `key` (the encryption key), `pwd` (prompt), or a FILE
    #[arg(long, value_name = "SOURCE")]
    mac_key: Option<String>,

    /// Detached signatures as `%MAC` + base64, shown counters as base64
    #[arg(long, short = 'a')]
    ascii: bool,

    // ── I/O ────────────────────────────────────────────────────────────────────
    /// Skip SIZE source bytes and advance the counter to match
    #[arg(long, value_name = "SIZE", conflicts_with = "ixseek")]
    iseek: Option<String>,

    /// Skip SIZE source bytes, counter untouched
    #[arg(long, value_name = "SIZE")]
    ixseek: Option<String>,

    /// Seek the destination to SIZE before writing
    #[arg(long, value_name = "SIZE")]
    oseek: Option<String>,

    /// Process at most SIZE source bytes
    #[arg(long, short = 'n', value_name = "SIZE")]
    count: Option<String>,

    /// Transfer chunk size
    #[arg(long, value_name = "SIZE")]
    chunk_size: Option<String>,

    /// On I/O errors: exit, cont or sync
    #[arg(long, short = 'E', value_name = "ACTION")]
    errors: Option<String>,

    /// Zero-pad the last block
    #[arg(long)]
    pad: bool,

    /// Sync the destination after every write
    #[arg(long)]
    fsync: bool,

    /// Copy the source modification time to the destination
    #[arg(long, short = 'T')]
    preserve_times: bool,

    /// Write the result over the source file
    #[arg(long, short = 'O')]
    overwrite: bool,

    /// Keep existing destination contents past the written range
    #[arg(long)]
    no_truncate: bool,

    // ── status ─────────────────────────────────────────────────────────────────
    /// Print a status line every SECONDS
    #[arg(long, value_name = "SECONDS")]
    status: Option<f64>,

    /// Show a live progress line on stderr
    #[arg(long, short = 'P')]
    progress: bool,
}

#[derive(Args, Debug)]
struct SumArgs {
    /// Inputs to hash, `-` for stdin
    #[arg(default_value = "-")]
    files: Vec<String>,

    /// Digest width in bits
    #[arg(long, short = 'b')]
    bits: Option<u32>,

    /// Print base64 digests
    #[arg(long, conflicts_with = "raw")]
    base64: bool,

    /// Print raw digest bytes
    #[arg(long)]
    raw: bool,

    /// Key the digest: `pwd` (prompt) or a FILE
    #[arg(long, value_name = "SOURCE")]
    mac_key: Option<String>,

    /// Hash at most SIZE bytes of each input
    #[arg(long, short = 'n', value_name = "SIZE")]
    limit: Option<String>,

    /// Check the `HASH  name` lines in LIST instead
    #[arg(long, short = 'C', value_name = "LIST")]
    check: Option<String>,

    /// On I/O errors: exit, cont or sync
    #[arg(long, short = 'E', value_name = "ACTION")]
    errors: Option<String>,
}

#[derive(Args, Debug)]
struct GenArgs {
    /// Number of bytes to produce
    size: String,

    /// Destination, `-` for stdout
    #[arg(default_value = "-")]
    destination: String,

    /// Zero bytes instead of random ones
    #[arg(long)]
    zero: bool,

    /// Keystream mode for random output
    #[arg(long, short = 'm')]
    mode: Option<String>,

    /// Transfer chunk size
    #[arg(long, value_name = "SIZE")]
    chunk_size: Option<String>,

    /// Sync the destination after every write
    #[arg(long)]
    fsync: bool,

    /// Show a live progress line on stderr
    #[arg(long, short = 'P')]
    progress: bool,
}

#[derive(Args, Debug)]
struct Base64Args {
    /// Source, `-` for stdin
    #[arg(default_value = "-")]
    source: String,

    /// Destination, `-` for stdout
    #[arg(default_value = "-")]
    destination: String,

    /// Decode instead of encode
    #[arg(long, short = 'd')]
    decode: bool,

    /// Transfer chunk size
    #[arg(long, value_name = "SIZE")]
    chunk_size: Option<String>,

    /// On I/O errors: exit, cont or sync
    #[arg(long, short = 'E', value_name = "ACTION")]
    errors: Option<String>,

    /// Sync the destination after every write
    #[arg(long)]
    fsync: bool,

    /// Copy the source modification time to the destination
    #[arg(long, short = 'T')]
    preserve_times: bool,

    /// Show a live progress line on stderr
    #[arg(long, short = 'P')]
    progress: bool,
}

#[derive(Args, Debug)]
struct BenchArgs {
    /// How long to run
    #[arg(default_value_t = 1.0)]
    seconds: f64,

    /// Mode of operation: ctr, tctr or cbc
    #[arg(long, short = 'm')]
    mode: Option<String>,

    /// Measure decryption
    #[arg(long, short = 'd')]
    decrypt: bool,

    /// Also feed a Skein MAC of this width
    #[arg(long, value_name = "BITS")]
    mac_bits: Option<u32>,

    /// Print a status line every SECONDS
    #[arg(long, value_name = "SECONDS")]
    status: Option<f64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("tfcrypt: {e:#}");
            let code = e.downcast_ref::<TfcError>().map_or(2, TfcError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;
    init_logging(&config, cli.quiet, cli.verbose);
    debug!(config = %config_path.display(), "configuration loaded");

    let units = if cli.si || config.io.si_units {
        SizeUnits::Si
    } else {
        SizeUnits::Binary
    };
    let globals = Globals {
        quiet: cli.quiet,
        verbose: cli.verbose > 0,
        units,
    };

    match cli.command {
        Commands::Encrypt(args) => cmd_crypt(&config, &globals, Some(Direction::Encrypt), args).await,
        Commands::Decrypt(args) => cmd_crypt(&config, &globals, Some(Direction::Decrypt), args).await,
        Commands::Plain(args) => cmd_crypt(&config, &globals, None, args).await,
        Commands::Sum(args) => cmd_sum(&config, &globals, args).await,
        Commands::Gen(args) => cmd_gen(&config, &globals, args).await,
        Commands::Base64(args) => cmd_base64(&config, &globals, args).await,
        Commands::Bench(args) => cmd_bench(&config, &globals, args).await,
    }
}

struct Globals {
    quiet: bool,
    verbose: bool,
    units: SizeUnits,
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<TfcConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(TfcConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(config: &TfcConfig, quiet: bool, verbose: u8) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match (quiet, verbose) {
        (true, _) => "off",
        (false, 0) => config.log.level.as_str(),
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_env("TFC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    if config.log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init();
    }
}

// ── Password prompt ───────────────────────────────────────────────────────────

/// Reads secrets from the controlling terminal, echo off.
struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&mut self, message: &str) -> TfcResult<SecretString> {
        rpassword::prompt_password(message)
            .map(SecretString::from)
            .map_err(|e| {
                debug!("password prompt: {e}");
                TfcError::Cancelled
            })
    }
}

// ── Signals and status ────────────────────────────────────────────────────────

/// SIGINT/SIGTERM cancel the run (a second one exits at once), SIGUSR1 asks
/// for a status line, SIGQUIT toggles the short status format.
fn spawn_signal_handler(cancel: CancellationToken, control: Arc<StatusControl>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("registering SIGUSR1 handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("registering SIGQUIT handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
                _ = sigusr1.recv() => {
                    control.request();
                    continue;
                }
                _ = sigquit.recv() => {
                    control.toggle_format();
                    continue;
                }
            }
            if cancel.is_cancelled() {
                std::process::exit(1);
            }
            info!("interrupt received, stopping after the current chunk");
            cancel.cancel();
        }
    });
    Ok(())
}

fn status_reporter(
    control: Arc<StatusControl>,
    interval: Option<Duration>,
    units: SizeUnits,
) -> StatusReporter {
    StatusReporter::new(
        control,
        interval,
        units,
        Box::new(|line: &str| eprintln!("tfcrypt: {line}")),
    )
}

/// Live progress line driven by the shared totals until `done` fires.
fn spawn_progress_line(
    progress: Arc<Progress>,
    units: SizeUnits,
    done: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {elapsed_precise} {msg}")
            .context("progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    Ok(tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = tick.tick() => {}
            }
            pb.set_message(format!(
                "read {} written {}",
                human_bytes(progress.bytes_read(), units),
                human_bytes(progress.bytes_written(), units)
            ));
        }
        pb.finish_and_clear();
    }))
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

fn open_input(target: &IoTarget) -> Result<Box<dyn Input>> {
    Ok(match target {
        IoTarget::Stdio => Box::new(io::stdin()),
        IoTarget::Path(p) => {
            Box::new(File::open(p).with_context(|| format!("opening {}", p.display()))?)
        }
    })
}

fn open_reader(target: &IoTarget) -> Result<Box<dyn Read>> {
    Ok(match target {
        IoTarget::Stdio => Box::new(io::stdin()),
        IoTarget::Path(p) => {
            Box::new(File::open(p).with_context(|| format!("opening {}", p.display()))?)
        }
    })
}

fn open_output(target: &IoTarget, truncate: bool) -> Result<Box<dyn Output>> {
    Ok(match target {
        IoTarget::Stdio => Box::new(io::stdout()),
        IoTarget::Path(p) => Box::new(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(truncate)
                .open(p)
                .with_context(|| format!("creating {}", p.display()))?,
        ),
    })
}

fn as_reader(slot: &mut Option<Box<dyn Read>>) -> Option<&mut dyn Read> {
    slot.as_mut().map(|r| r.as_mut() as &mut dyn Read)
}

fn as_output(slot: &mut Option<Box<dyn Output>>) -> Option<&mut dyn Output> {
    slot.as_mut().map(|w| w.as_mut() as &mut dyn Output)
}

/// File-system side of a crypt run, resolved from the arguments.
#[derive(Debug, Clone)]
struct Paths {
    source: IoTarget,
    destination: IoTarget,
    export_key: Option<IoTarget>,
}

// ── `tfcrypt encrypt | decrypt | plain` ───────────────────────────────────────

fn size_context(cfg: &SessionConfig) -> SizeContext {
    SizeContext {
        units: cfg.units,
        block_size: BLOCK_SIZE as u64,
        chunk_size: cfg.chunk_size as u64,
        key_bytes: cfg.key_bytes() as u64,
    }
}

fn parse_opt_size(spec: Option<&str>, ctx: &SizeContext) -> Result<Option<u64>> {
    spec.map(|s| parse_size(s, ctx).with_context(|| format!("size '{s}'")))
        .transpose()
}

/// Merge the defaults file and the command line into a session configuration.
fn build_session_config(
    config: &TfcConfig,
    globals: &Globals,
    direction: Option<Direction>,
    args: &CryptArgs,
) -> Result<(SessionConfig, Paths)> {
    let mut cfg = SessionConfig::from(config);
    cfg.units = globals.units;
    cfg.quiet = globals.quiet;
    cfg.verbose = globals.verbose;

    match direction {
        Some(d) => {
            cfg.direction = d;
            if let Some(m) = &args.mode {
                cfg.mode = m.parse()?;
            }
        }
        None => cfg.mode = Mode::Plain,
    }
    if let Some(b) = args.bits {
        cfg.key_bits = b;
    }
    if let Some(b) = args.mac_bits {
        cfg.mac_bits = b;
    }
    if let Some(p) = args.passes {
        cfg.passes = p;
    }

    if let Some(spec) = &args.chunk_size {
        let size = parse_size(spec, &size_context(&cfg))?;
        cfg.chunk_size = usize::try_from(size).context("chunk size")?;
    }
    let ctx = size_context(&cfg);

    cfg.key_source = match (&args.rawkey, &args.keyfile) {
        (Some(r), _) => KeySource::Raw(r.parse()?),
        (None, Some(k)) => KeySource::Keyfile(k.parse()?),
        (None, None) => KeySource::Password,
    };
    cfg.keyfile_limit = parse_opt_size(args.keyfile_limit.as_deref(), &ctx)?;
    cfg.keyfile_bound_to_mac_key = !args.unbound_keyfile;

    cfg.mac_policy = if args.sign {
        MacPolicy::Sign
    } else if args.verify {
        MacPolicy::Verify
    } else if args.verify_only {
        MacPolicy::VerifyOnly
    } else if args.drop_mac {
        MacPolicy::Drop
    } else {
        MacPolicy::None
    };
    if let Some(f) = &args.mac_file {
        cfg.mac_location = MacLocation::Detached(f.parse()?);
    }
    if let Some(k) = &args.mac_key {
        cfg.mac_key_source = k.parse()?;
    }
    cfg.ascii = args.ascii;

    if let Some(c) = &args.counter {
        cfg.counter_source = c.parse()?;
    }
    cfg.show_counter = args.show_counter;
    cfg.ctr_blocks = parse_opt_size(args.ctr_blocks.as_deref(), &ctx)?.unwrap_or(0);
    cfg.ctr_bytes = parse_opt_size(args.ctr_bytes.as_deref(), &ctx)?.unwrap_or(0);

    if let Some(t) = &args.tweak_file {
        cfg.tweak = TweakSource::File(t.parse()?);
    } else if args.secret_tweak {
        cfg.tweak = TweakSource::Secret;
    }

    cfg.source_seek = match (&args.iseek, &args.ixseek) {
        (Some(s), _) => Some(SeekRequest {
            offset: parse_size(s, &ctx)?,
            adjust_counter: true,
        }),
        (None, Some(s)) => Some(SeekRequest {
            offset: parse_size(s, &ctx)?,
            adjust_counter: false,
        }),
        (None, None) => None,
    };
    cfg.destination_seek = parse_opt_size(args.oseek.as_deref(), &ctx)?.unwrap_or(0);
    cfg.max_bytes = parse_opt_size(args.count.as_deref(), &ctx)?;

    if let Some(e) = &args.errors {
        cfg.error_action = e.parse()?;
    }
    cfg.pad_final_block |= args.pad;
    cfg.fsync |= args.fsync;
    cfg.preserve_timestamps |= args.preserve_times;
    cfg.overwrite_source = args.overwrite;
    cfg.truncate = !args.no_truncate && !args.overwrite;

    cfg.status_interval = args
        .status
        .map(|secs| Duration::try_from_secs_f64(secs).context("status interval"))
        .transpose()?;

    let source: IoTarget = args.source.parse()?;
    if cfg.overwrite_source && source.is_stdio() {
        anyhow::bail!("cannot overwrite standard input");
    }
    let destination = if cfg.overwrite_source {
        source.clone()
    } else {
        args.destination.parse()?
    };
    let export_key = args.export_key.as_deref().map(str::parse::<IoTarget>).transpose()?;

    cfg.validate()?;
    Ok((
        cfg,
        Paths {
            source,
            destination,
            export_key,
        },
    ))
}

async fn cmd_crypt(
    config: &TfcConfig,
    globals: &Globals,
    direction: Option<Direction>,
    args: CryptArgs,
) -> Result<u8> {
    let (cfg, paths) = build_session_config(config, globals, direction, &args)?;
    info!(mode = %cfg.mode, direction = ?cfg.direction, mac = ?cfg.mac_policy, "starting");

    let cancel = CancellationToken::new();
    let control = StatusControl::new();
    let progress = Progress::new();
    spawn_signal_handler(cancel.clone(), Arc::clone(&control))?;

    let done = CancellationToken::new();
    let bar = if args.progress && !globals.quiet {
        Some(spawn_progress_line(Arc::clone(&progress), globals.units, done.clone())?)
    } else {
        None
    };

    let reporter = status_reporter(control, cfg.status_interval, globals.units);
    let outcome = {
        let progress = Arc::clone(&progress);
        tokio::task::spawn_blocking(move || run_crypt(cfg, paths, cancel, progress, reporter))
            .await
            .context("session task panicked")?
    };
    done.cancel();
    if let Some(bar) = bar {
        let _ = bar.await;
    }
    outcome
}

fn run_crypt(
    cfg: SessionConfig,
    paths: Paths,
    cancel: CancellationToken,
    progress: Arc<Progress>,
    reporter: StatusReporter,
) -> Result<u8> {
    let exporting = paths.export_key.is_some();

    let mut key = match &cfg.key_source {
        KeySource::Raw(t) | KeySource::Keyfile(t) => Some(open_reader(t)?),
        KeySource::Password => None,
    };
    let mut tweak = match &cfg.tweak {
        TweakSource::File(t) => Some(open_reader(t)?),
        _ => None,
    };
    let mut counter = match &cfg.counter_source {
        CounterSource::File(t) => Some(open_reader(t)?),
        _ => None,
    };
    let mut mac_key = match &cfg.mac_key_source {
        MacKeySource::File(t) => Some(open_reader(t)?),
        _ => None,
    };
    let (mut signature_in, mut signature_out) = match &cfg.mac_location {
        MacLocation::Detached(t) if cfg.mac_policy == MacPolicy::Sign => {
            (None, Some(open_output(t, true)?))
        }
        MacLocation::Detached(t) if cfg.mac_policy.is_verify() => (Some(open_reader(t)?), None),
        _ => (None, None),
    };
    let mut key_out = paths
        .export_key
        .as_ref()
        .map(|t| open_output(t, true))
        .transpose()?;

    let (mut source, mut destination): (Box<dyn Input>, Box<dyn Output>) = if exporting {
        (Box::new(io::empty()), Box::new(io::sink()))
    } else if cfg.overwrite_source {
        let IoTarget::Path(p) = &paths.source else {
            anyhow::bail!("cannot overwrite standard input");
        };
        let dest = OpenOptions::new()
            .write(true)
            .open(p)
            .with_context(|| format!("reopening {} for writing", p.display()))?;
        (open_input(&paths.source)?, Box::new(dest))
    } else {
        (
            open_input(&paths.source)?,
            open_output(&paths.destination, cfg.truncate)?,
        )
    };

    let mut session = Session::new(cfg)?
        .with_prompt(Box::new(TerminalPrompt))
        .with_cancel(cancel)
        .with_progress(progress)
        .with_status(reporter);

    let outcome = session.run(
        Endpoints {
            key: as_reader(&mut key),
            tweak: as_reader(&mut tweak),
            counter: as_reader(&mut counter),
            mac_key: as_reader(&mut mac_key),
            signature_in: as_reader(&mut signature_in),
            signature_out: as_output(&mut signature_out),
            key_out: as_output(&mut key_out),
        },
        source.as_mut(),
        destination.as_mut(),
    )?;

    if outcome.soft_errors > 0 {
        warn!(errors = outcome.soft_errors, "finished with tolerated I/O errors");
    }
    info!(
        read = outcome.report.bytes_read,
        written = outcome.report.bytes_written,
        "done"
    );
    Ok(outcome.exit_code() as u8)
}

// ── `tfcrypt sum` ─────────────────────────────────────────────────────────────

fn sum_mac_key(spec: Option<&str>) -> Result<Option<MacKey>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    Ok(Some(match spec.parse::<MacKeySource>()? {
        MacKeySource::Password => mac_key_from_password(&mut TerminalPrompt)?,
        MacKeySource::File(t) => mac_key_from_reader(&mut open_reader(&t)?, ErrorAction::Exit)?,
        _ => anyhow::bail!("{spec}: a checksum key must be `pwd` or a file"),
    }))
}

async fn cmd_sum(config: &TfcConfig, globals: &Globals, args: SumArgs) -> Result<u8> {
    let ctx = SizeContext {
        units: globals.units,
        chunk_size: config.io.chunk_size as u64,
        ..SizeContext::default()
    };
    let opts = SumOptions {
        bits: args.bits.unwrap_or(config.crypt.mac_bits),
        format: if args.raw {
            BinaryFormat::Raw
        } else if args.base64 {
            BinaryFormat::Base64
        } else {
            BinaryFormat::Hex
        },
        limit: parse_opt_size(args.limit.as_deref(), &ctx)?,
        error_action: match &args.errors {
            Some(e) => e.parse()?,
            None => config.io.error_action,
        },
    };

    tokio::task::spawn_blocking(move || -> Result<u8> {
        let key = sum_mac_key(args.mac_key.as_deref())?;
        let stdout = io::stdout();
        let mut out = stdout.lock();

        if let Some(list) = &args.check {
            let mut list = BufReader::new(open_reader(&list.parse()?)?);
            let open = |name: &str| -> TfcResult<Box<dyn Read>> {
                let target: IoTarget = name.parse()?;
                open_reader(&target).map_err(TfcError::Other)
            };
            let report = check_list(&mut list, open, &opts, key.as_ref(), &mut out)?;
            return Ok(report.exit_code() as u8);
        }

        for name in &args.files {
            let mut input = open_reader(&name.parse()?)?;
            sum_one(&mut input, name, &opts, key.as_ref(), &mut out)?;
        }
        out.flush().context("flushing stdout")?;
        Ok(0)
    })
    .await
    .context("checksum task panicked")?
}

// ── `tfcrypt gen` ─────────────────────────────────────────────────────────────

async fn cmd_gen(config: &TfcConfig, globals: &Globals, args: GenArgs) -> Result<u8> {
    let mut ctx = SizeContext {
        units: globals.units,
        chunk_size: config.io.chunk_size as u64,
        ..SizeContext::default()
    };
    let chunk_size = match &args.chunk_size {
        Some(spec) => usize::try_from(parse_size(spec, &ctx)?).context("chunk size")?,
        None => config.io.chunk_size,
    };
    ctx.chunk_size = chunk_size as u64;
    let n_bytes = parse_size(&args.size, &ctx)?;
    let mode: Mode = match &args.mode {
        Some(m) => m.parse()?,
        None => config.crypt.mode,
    };
    let kind = if args.zero {
        GenerateKind::Zero
    } else {
        GenerateKind::Random
    };
    let opts = TransferOptions {
        chunk_size,
        fsync: args.fsync || config.io.fsync,
        error_action: config.io.error_action,
        ..TransferOptions::default()
    };
    let destination: IoTarget = args.destination.parse()?;

    let cancel = CancellationToken::new();
    let control = StatusControl::new();
    let progress = Progress::new();
    spawn_signal_handler(cancel.clone(), Arc::clone(&control))?;
    let done = CancellationToken::new();
    let bar = if args.progress && !globals.quiet {
        Some(spawn_progress_line(Arc::clone(&progress), globals.units, done.clone())?)
    } else {
        None
    };
    let mut reporter = status_reporter(control, None, globals.units);

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut out = open_output(&destination, true)?;
        let report = generate(
            out.as_mut(),
            n_bytes,
            kind,
            mode,
            &opts,
            &cancel,
            &progress,
            Some(&mut reporter),
        )?;
        out.flush().context("flushing destination")?;
        Ok(report)
    })
    .await
    .context("generator task panicked")??;
    done.cancel();
    if let Some(bar) = bar {
        let _ = bar.await;
    }

    Ok(u8::from(report.cancelled || report.soft_errors > 0))
}

// ── `tfcrypt base64` ──────────────────────────────────────────────────────────

async fn cmd_base64(config: &TfcConfig, globals: &Globals, args: Base64Args) -> Result<u8> {
    let ctx = SizeContext {
        units: globals.units,
        chunk_size: config.io.chunk_size as u64,
        ..SizeContext::default()
    };
    let chunk_size = match &args.chunk_size {
        Some(spec) => usize::try_from(parse_size(spec, &ctx)?).context("chunk size")?,
        None => config.io.chunk_size,
    };
    let error_action = match &args.errors {
        Some(e) => e.parse()?,
        None => config.io.error_action,
    };
    let fsync = args.fsync || config.io.fsync;
    let opts = TransferOptions {
        chunk_size,
        fsync,
        error_action,
        ..TransferOptions::default()
    };
    let direction = if args.decode {
        Direction::Decrypt
    } else {
        Direction::Encrypt
    };
    let preserve = args.preserve_times || config.io.preserve_timestamps;
    let source: IoTarget = args.source.parse()?;
    let destination: IoTarget = args.destination.parse()?;

    let cancel = CancellationToken::new();
    let control = StatusControl::new();
    let progress = Progress::new();
    spawn_signal_handler(cancel.clone(), Arc::clone(&control))?;
    let done = CancellationToken::new();
    let bar = if args.progress && !globals.quiet {
        Some(spawn_progress_line(Arc::clone(&progress), globals.units, done.clone())?)
    } else {
        None
    };
    let mut reporter = status_reporter(control, None, globals.units);
    reporter.set_verb(if args.decode { "decoded" } else { "encoded" });

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut input = open_input(&source)?;
        let mut out = open_output(&destination, true)?;
        let report = base64_stream(
            input.as_mut(),
            out.as_mut(),
            direction,
            &opts,
            &cancel,
            &progress,
            Some(&mut reporter),
        )?;
        if preserve {
            if let Some(mtime) = input.modified() {
                if let Err(e) = out.set_modified(mtime) {
                    warn!("preserving timestamps: {e}");
                }
            }
        }
        out.flush().context("flushing destination")?;
        if fsync {
            out.sync().context("syncing destination")?;
        }
        Ok(report)
    })
    .await
    .context("base64 task panicked")??;
    done.cancel();
    if let Some(bar) = bar {
        let _ = bar.await;
    }

    if report.soft_errors > 0 {
        warn!(errors = report.soft_errors, "finished with tolerated I/O errors");
    }
    Ok(u8::from(report.cancelled || report.soft_errors > 0))
}

// ── `tfcrypt bench` ───────────────────────────────────────────────────────────

fn bench_options(config: &TfcConfig, args: &BenchArgs) -> Result<BenchOptions> {
    if !args.seconds.is_finite() || args.seconds <= 0.0 {
        anyhow::bail!("{}: benchmark time must be positive", args.seconds);
    }
    let mode: Mode = match &args.mode {
        Some(m) => m.parse()?,
        None => config.crypt.mode,
    };
    Ok(BenchOptions {
        mode,
        direction: if args.decrypt {
            Direction::Decrypt
        } else {
            Direction::Encrypt
        },
        mac_bits: args.mac_bits,
        duration: Duration::from_secs_f64(args.seconds),
    })
}

async fn cmd_bench(config: &TfcConfig, globals: &Globals, args: BenchArgs) -> Result<u8> {
    let opts = bench_options(config, &args)?;
    let interval = args
        .status
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64);

    let cancel = CancellationToken::new();
    let control = StatusControl::new();
    let progress = Progress::new();
    spawn_signal_handler(cancel.clone(), Arc::clone(&control))?;
    let mut reporter = status_reporter(control, interval, globals.units);
    reporter.set_verb(if args.decrypt { "decrypted" } else { "encrypted" });

    let report = tokio::task::spawn_blocking(move || {
        benchmark(&opts, &cancel, &progress, Some(&mut reporter))
    })
    .await
    .context("benchmark task panicked")??;

    if !globals.quiet {
        println!("{}", report.summary(globals.units));
    }
    Ok(u8::from(report.cancelled))
}
