//! keybearer: M-of-N passcode file encryption
//!
//! Commands:
//!   encrypt <file> -m <M>    - seal a file so any M of N passcodes open it
//!   decrypt <envelope>       - open an envelope with M passcodes
//!   inspect <envelope>       - show envelope parameters without decrypting
//!   salt                     - print a fresh random salt
//!   config show              - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use keybearer_core::config::{default_path, KeybearerConfig};
use keybearer_crypto::{binomial, check_threshold, Envelope, Session, TrimPolicy};
use keybearer_worker::EncryptionWorker;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "keybearer",
    version,
    about = "Threshold file encryption: any M of N passcodes unlock the file",
    long_about = "keybearer: encrypt a file under N passcodes so that any M of them decrypt it"
)]
struct Cli {
    /// Path to the configuration file (default: $KEYBEARER_CONFIG, else ./keybearer.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "KEYBEARER_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "KEYBEARER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file under N passcodes, any M of which will open it
    ///
    /// Passcodes are taken from repeated -p flags, or prompted for N times.
    Encrypt {
        /// File to encrypt
        file: PathBuf,
        /// Passcodes needed to decrypt (M)
        #[arg(short = 'm', long)]
        threshold: usize,
        /// Number of passcodes to prompt for (N); implied by -p
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// A passcode (repeat for each)
        #[arg(short = 'p', long = "password")]
        passwords: Vec<String>,
        /// Envelope output path (default: <FILE>.keybearer)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// MIME type recorded in the envelope
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        /// PBKDF2 iteration count (overrides config)
        #[arg(long)]
        iterations: Option<u32>,
        /// Proceed even if C(N, M) x iterations exceeds crypto.max_derivation_work
        #[arg(long)]
        force: bool,
        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Decrypt an envelope with M of its passcodes
    Decrypt {
        /// Envelope file
        envelope: PathBuf,
        /// A passcode (repeat for each)
        #[arg(short = 'p', long = "password")]
        passwords: Vec<String>,
        /// Plaintext output path (default: filename stored in the envelope)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// How to treat more than M passcodes: random or exhaustive (overrides config)
        #[arg(long)]
        trim: Option<String>,
        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Show envelope parameters without decrypting
    Inspect {
        /// Envelope file
        envelope: PathBuf,
    },

    /// Print a fresh random salt (base64)
    Salt,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_path);
    let loaded = load_config(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    let config = loaded.clone().unwrap_or_default();

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(f) => f,
        None if config.log.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    if loaded.is_none() {
        warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    match cli.command {
        Commands::Encrypt {
            file,
            threshold,
            count,
            passwords,
            output,
            mime,
            iterations,
            force,
            overwrite,
        } => {
            let opts = EncryptOpts {
                threshold,
                count,
                passwords,
                output,
                mime,
                iterations: iterations.unwrap_or(config.crypto.iterations),
                force,
                overwrite,
            };
            cmd_encrypt(&config, &file, opts).await
        }
        Commands::Decrypt {
            envelope,
            passwords,
            output,
            trim,
            overwrite,
        } => {
            let trim = trim.as_deref().unwrap_or(&config.decrypt.trim);
            cmd_decrypt(&envelope, passwords, output.as_deref(), trim, overwrite).await
        }
        Commands::Inspect { envelope } => cmd_inspect(&envelope).await,
        Commands::Salt => {
            println!("{}", Session::new().make_salt());
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

/// `None` when no file exists at `path`.
fn load_config(path: &Path) -> keybearer_core::Result<Option<KeybearerConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    KeybearerConfig::load(path).map(Some)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

fn prompt_passwords(count: usize) -> Result<Vec<String>> {
    (1..=count)
        .map(|i| {
            rpassword::prompt_password(format!("Passcode {i}/{count}: "))
                .with_context(|| format!("reading passcode {i}"))
        })
        .collect()
}

/// Number of key derivations times the iteration count.
fn derivation_work(n: usize, m: usize, iterations: u32) -> Option<u64> {
    let combos = u64::try_from(binomial(n, m)?).ok()?;
    combos.checked_mul(u64::from(iterations))
}

fn default_envelope_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".keybearer");
    PathBuf::from(name)
}

/// Where to write decrypted output. The stored filename is untrusted: only
/// its final component is used, next to the envelope.
fn plaintext_path(envelope_path: &Path, stored_name: &str) -> Option<PathBuf> {
    let name = Path::new(stored_name).file_name()?;
    let dir = envelope_path.parent().unwrap_or_else(|| Path::new(""));
    Some(dir.join(name))
}

async fn write_new_file(path: &Path, bytes: &[u8], overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!("{} already exists (use --overwrite to replace it)", path.display());
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

// ── `keybearer encrypt` ───────────────────────────────────────────────────────

struct EncryptOpts {
    threshold: usize,
    count: Option<usize>,
    passwords: Vec<String>,
    output: Option<PathBuf>,
    mime: String,
    iterations: u32,
    force: bool,
    overwrite: bool,
}

async fn cmd_encrypt(config: &KeybearerConfig, file: &Path, opts: EncryptOpts) -> Result<()> {
    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let passwords = if opts.passwords.is_empty() {
        let n = opts
            .count
            .context("no passcodes given: pass -p for each passcode, or -n to be prompted")?;
        prompt_passwords(n)?
    } else {
        if let Some(n) = opts.count {
            if n != opts.passwords.len() {
                anyhow::bail!("-n {n} given but {} passcodes supplied", opts.passwords.len());
            }
        }
        opts.passwords
    };
    let n = passwords.len();
    let m = opts.threshold;

    let combos = check_threshold(n, m)?;
    let work = derivation_work(n, m, opts.iterations).unwrap_or(u64::MAX);
    if work > config.crypto.max_derivation_work && !opts.force {
        anyhow::bail!(
            "C({n}, {m}) = {combos} key derivations at {} iterations is {work} units of work, \
             above crypto.max_derivation_work ({}); lower the iteration count or pass --force",
            opts.iterations,
            config.crypto.max_derivation_work
        );
    }

    info!(file = %file.display(), n, m, iterations = opts.iterations, "encrypting");

    let mut worker = EncryptionWorker::spawn();
    worker.set_iterations(opts.iterations).await?;
    worker.set_plaintext(plaintext, filename, opts.mime).await?;

    let pb = make_progress_bar(combos as u64, "deriving");
    let total = combos as f64;
    let json = worker
        .encrypt(passwords, m, |fraction| {
            pb.set_position((fraction * total).round() as u64);
        })
        .await
        .context("encrypting")?;
    pb.finish_and_clear();

    let out = opts.output.unwrap_or_else(|| default_envelope_path(file));
    write_new_file(&out, json.as_bytes(), opts.overwrite).await?;
    println!(
        "wrote {} ({} of {} passcodes needed, {} wrapped keys)",
        out.display(),
        m,
        n,
        combos
    );
    Ok(())
}

// ── `keybearer decrypt` ───────────────────────────────────────────────────────

async fn cmd_decrypt(
    envelope_path: &Path,
    passwords: Vec<String>,
    output: Option<&Path>,
    trim: &str,
    overwrite: bool,
) -> Result<()> {
    let json = tokio::fs::read_to_string(envelope_path)
        .await
        .with_context(|| format!("reading {}", envelope_path.display()))?;

    let mut session = Session::new();
    session.set_trim_policy(trim.parse::<TrimPolicy>().map_err(anyhow::Error::msg)?);
    let (n, m) = session
        .set_cipher_envelope(&json)
        .with_context(|| format!("parsing envelope {}", envelope_path.display()))?;

    let passwords = if passwords.is_empty() {
        eprintln!("This file needs {m} of its {n} passcodes.");
        prompt_passwords(m)?
    } else {
        passwords
    };

    let plaintext = session.open(&passwords).context("opening envelope")?;

    let out = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let stored = session.envelope().map(|e| e.filename()).unwrap_or_default();
            plaintext_path(envelope_path, stored)
                .context("envelope has no usable filename; pass -o")?
        }
    };
    write_new_file(&out, &plaintext, overwrite).await?;
    println!("wrote {} ({} bytes)", out.display(), plaintext.len());
    Ok(())
}

// ── `keybearer inspect` ───────────────────────────────────────────────────────

async fn cmd_inspect(envelope_path: &Path) -> Result<()> {
    let json = tokio::fs::read_to_string(envelope_path)
        .await
        .with_context(|| format!("reading {}", envelope_path.display()))?;
    let envelope = Envelope::parse(&json)
        .with_context(|| format!("parsing envelope {}", envelope_path.display()))?;
    let meta = envelope.meta();

    println!("format:      {}", if envelope.is_legacy() { "legacy (read-only)" } else { "current" });
    println!(
        "algorithm:   {}-{}-{} (tag {} bits)",
        meta.cipher, meta.key_bits, meta.mode, meta.tag_bits
    );
    println!("threshold:   {} of {}", envelope.m(), envelope.n());
    println!("iterations:  {}", envelope.iterations());
    println!("keys:        {}", envelope.key_count());
    println!("filename:    {}", envelope.filename());
    println!("mime:        {}", envelope.mime());
    Ok(())
}

// ── `keybearer config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &KeybearerConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = config.to_toml().context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
