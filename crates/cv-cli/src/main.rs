//! cvault: chunkvault command-line client
//!
//! Commands:
//!   encode <path>         - encrypt into local chunk files plus a reference file
//!   decode <ref> [<dest>] - reassemble from local chunk files
//!   push <path>           - encrypt and upload to the configured chunk store
//!   pull <ref> [<dest>]   - download, verify, and restore
//!   delete <ref>          - remove every chunk named by a reference file
//!   config show           - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cv_core::config::{BackendKind, CodecConfig, StorageConfig};
use cv_core::{Expiry, Permission, VaultConfig};
use cv_crypto::{EncodeOptions, KdfParams, ReferenceFile};
use cv_dispatch::{DispatchContext, Orchestrator, Progress, ProgressFn};
use cv_storage::{ChunkStore, FsStore, HttpJobStore, OpendalStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cvault",
    version,
    about = "chunkvault client",
    long_about = "cvault: client-side encrypted, chunked file storage"
)]
struct Cli {
    /// Path to chunkvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CVAULT_CONFIG",
        default_value = "~/.config/chunkvault/config.toml"
    )]
    config: PathBuf,

    /// Log filter (overrides [log] level), e.g. "debug" or "cv_dispatch=trace"
    #[arg(long, env = "CVAULT_LOG", global = true)]
    log: Option<String>,

    /// Log output format (overrides [log] format)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Master passphrase mixed into every chunk key
    #[arg(long, env = "CVAULT_MASTER_KEY", hide_env_values = true, global = true)]
    master_key: Option<String>,

    /// Prompt for the master passphrase on the terminal
    #[arg(long, global = true, conflicts_with = "master_key")]
    prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file or directory into local chunk files (no upload)
    Encode {
        /// File or directory to encode
        source: PathBuf,
        /// Reference file to write (default: <name>.cvref)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Directory for chunk files (default: <reference>.chunks)
        #[arg(long)]
        chunks: Option<PathBuf>,
    },

    /// Reassemble a file or directory from local chunk files
    Decode {
        /// Reference file written by `encode`
        reference: PathBuf,
        /// Destination (default: original name in the current directory)
        dest: Option<PathBuf>,
        /// Directory holding the chunk files (default: <reference>.chunks)
        #[arg(long)]
        chunks: Option<PathBuf>,
    },

    /// Encrypt and upload a file or directory
    ///
    /// S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Push {
        /// File or directory to upload
        source: PathBuf,
        /// Reference file to write (default: <name>.cvref)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Lifetime of the stored chunks, e.g. "90s", "30m", "12h", "7d"
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<Duration>,
        /// Make chunks readable by anyone holding the identifiers
        #[arg(long, conflicts_with = "owner")]
        public: bool,
        /// Restrict chunks to a named owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Download, verify, and restore from a reference file
    Pull {
        /// Reference file written by `push`
        reference: PathBuf,
        /// Destination (default: original name in the current directory)
        dest: Option<PathBuf>,
    },

    /// Delete every chunk named by a reference file
    Delete {
        /// Reference file written by `push`
        reference: PathBuf,
    },

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

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = VaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, format);

    match cli.command {
        Commands::Encode {
            ref source,
            ref out,
            ref chunks,
        } => {
            let master = master_key(&cli)?;
            cmd_encode(&config, master.as_ref(), source, out.as_deref(), chunks.as_deref())
        }
        Commands::Decode {
            ref reference,
            ref dest,
            ref chunks,
        } => {
            let master = master_key(&cli)?;
            cmd_decode(master.as_ref(), reference, dest.as_deref(), chunks.as_deref())
        }
        Commands::Push {
            ref source,
            ref out,
            ttl,
            public,
            ref owner,
        } => {
            let master = master_key(&cli)?;
            let permission = permission_from_flags(public, owner.as_deref());
            cmd_push(
                &config,
                master.as_ref(),
                source,
                out.as_deref(),
                ttl.map(Expiry::after),
                permission,
            )
            .await
        }
        Commands::Pull {
            ref reference,
            ref dest,
        } => {
            let master = master_key(&cli)?;
            cmd_pull(&config, master.as_ref(), reference, dest.as_deref()).await
        }
        Commands::Delete { ref reference } => cmd_delete(&config, reference).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn master_key(cli: &Cli) -> Result<Option<SecretString>> {
    if cli.prompt {
        let pass = rpassword::prompt_password("Master passphrase: ")
            .context("reading master passphrase")?;
        if pass.is_empty() {
            anyhow::bail!("empty master passphrase");
        }
        return Ok(Some(SecretString::from(pass)));
    }
    Ok(cli
        .master_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .map(|k| SecretString::from(k.clone())))
}

fn encode_options(codec: &CodecConfig) -> EncodeOptions {
    EncodeOptions {
        chunk_size: codec.chunk_size,
        compress: codec.compress,
        zstd_level: codec.zstd_level,
        kdf: KdfParams {
            min_rounds: codec.kdf_min_rounds,
            max_rounds: codec.kdf_max_rounds,
        },
    }
}

fn permission_from_flags(public: bool, owner: Option<&str>) -> Option<Permission> {
    match (public, owner) {
        (true, _) => Some(Permission::Public),
        (false, Some(owner)) => Some(Permission::Owner(owner.to_string())),
        (false, None) => None,
    }
}

/// Parse a lifetime like "45", "90s", "30m", "12h", or "7d".
fn parse_ttl(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => s.split_at(i),
        None => (s, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid lifetime: {s:?}"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        other => return Err(format!("unknown lifetime unit {other:?} (use s, m, h, or d)")),
    };
    if secs == 0 {
        return Err("lifetime must be positive".into());
    }
    Ok(Duration::from_secs(secs))
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

fn default_reference_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    PathBuf::from(format!("{name}.cvref"))
}

fn default_chunks_dir(reference: &Path) -> PathBuf {
    reference.with_extension("chunks")
}

fn default_dest(reference: &ReferenceFile) -> PathBuf {
    PathBuf::from(&reference.metadata.name)
}

/// Build an OpenDAL S3 operator using credentials from environment variables.
fn build_operator_from_env(storage: &StorageConfig) -> Result<opendal::Operator> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("CVAULT_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
        )?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("CVAULT_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;

    cv_storage::operator::build_from_core_config(storage, &access_key, &secret_key)
        .context("building storage operator")
}

/// Open the chunk store selected by `[storage] backend`.
async fn open_store(storage: &StorageConfig) -> Result<Arc<dyn ChunkStore>> {
    let store: Arc<dyn ChunkStore> = match storage.backend {
        BackendKind::Fs => {
            let root = expand_tilde(&storage.root);
            Arc::new(
                FsStore::open(root.clone())
                    .await
                    .with_context(|| format!("opening chunk directory: {}", root.display()))?,
            )
        }
        BackendKind::S3 => {
            let op = build_operator_from_env(storage)?;
            cv_storage::check_health(&op)
                .await
                .with_context(|| format!("reaching {} bucket {}", storage.endpoint, storage.bucket))?;
            Arc::new(OpendalStore::new(op, "chunkvault"))
        }
        BackendKind::Memory => {
            tracing::warn!("memory backend selected: chunks vanish when cvault exits");
            let op = cv_storage::build_memory_operator()?;
            Arc::new(OpendalStore::new(op, "chunkvault"))
        }
        BackendKind::Http => Arc::new(
            HttpJobStore::from_config(storage)
                .with_context(|| format!("connecting to job API: {}", storage.job_url))?,
        ),
    };
    tracing::debug!(backend = store.kind(), "chunk store ready");
    Ok(store)
}

async fn open_orchestrator(
    config: &VaultConfig,
    prefix: &str,
) -> Result<(Arc<DispatchContext>, Orchestrator, ProgressBar)> {
    let store = open_store(&config.storage).await?;
    let ctx = Arc::new(
        DispatchContext::from_config(&config.dispatch).context("starting worker pool")?,
    );
    let pb = make_progress_bar(prefix);
    let pb_clone = pb.clone();
    let progress: ProgressFn = Arc::new(move |p: Progress| {
        pb_clone.set_length(p.total as u64);
        pb_clone.set_position(p.done as u64);
        if p.errors > 0 {
            pb_clone.set_message(format!("{} failed", p.errors));
        }
    });
    let orchestrator = Orchestrator::new(ctx.clone(), store).with_progress(progress);
    Ok((ctx, orchestrator, pb))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ── `cvault encode` / `cvault decode` ─────────────────────────────────────────

fn cmd_encode(
    config: &VaultConfig,
    master: Option<&SecretString>,
    source: &Path,
    out: Option<&Path>,
    chunks_dir: Option<&Path>,
) -> Result<()> {
    let ref_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_reference_path(source));
    let chunks_dir = chunks_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_chunks_dir(&ref_path));

    let mut encoded = cv_crypto::encode(master, source, &encode_options(&config.codec))
        .with_context(|| format!("encoding {}", source.display()))?;
    let checksum = encoded.metadata.checksum;
    let name = encoded.metadata.name.clone();

    std::fs::create_dir_all(&chunks_dir)
        .with_context(|| format!("creating chunk directory: {}", chunks_dir.display()))?;
    let mut ids = Vec::with_capacity(encoded.chunks.len());
    for (index, ciphertext) in encoded.take_ciphertexts().into_iter().enumerate() {
        let id = cv_chunks::chunk_id(&name, index, &checksum);
        let path = chunks_dir.join(&id);
        std::fs::write(&path, ciphertext)
            .with_context(|| format!("writing chunk: {}", path.display()))?;
        ids.push(id);
    }

    let size = encoded.metadata.size;
    let reference = encoded.into_reference(ids)?;
    reference
        .write_to(&ref_path)
        .with_context(|| format!("writing reference: {}", ref_path.display()))?;

    println!("Encoded {}", source.display());
    println!("  chunks:    {} in {}", reference.ids.len(), chunks_dir.display());
    println!("  bytes:     {}", fmt_bytes(size));
    println!("  reference: {}", ref_path.display());
    Ok(())
}

fn cmd_decode(
    master: Option<&SecretString>,
    ref_path: &Path,
    dest: Option<&Path>,
    chunks_dir: Option<&Path>,
) -> Result<()> {
    let reference = ReferenceFile::read_from(ref_path)
        .with_context(|| format!("reading reference: {}", ref_path.display()))?;
    let chunks_dir = chunks_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_chunks_dir(ref_path));

    let chunks = reference
        .ids
        .iter()
        .map(|id| {
            let path = chunks_dir.join(id);
            std::fs::read(&path).with_context(|| format!("reading chunk: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let dest = dest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_dest(&reference));
    let bytes = cv_crypto::decode_to_path(&chunks, &reference, master, &dest)
        .with_context(|| format!("decoding into {}", dest.display()))?;

    println!("Decoded {} → {} ({})", ref_path.display(), dest.display(), fmt_bytes(bytes));
    Ok(())
}

// ── `cvault push` ─────────────────────────────────────────────────────────────

async fn cmd_push(
    config: &VaultConfig,
    master: Option<&SecretString>,
    source: &Path,
    out: Option<&Path>,
    expiry: Option<Expiry>,
    permission: Option<Permission>,
) -> Result<()> {
    let ref_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_reference_path(source));

    let mut encoded = cv_crypto::encode(master, source, &encode_options(&config.codec))
        .with_context(|| format!("encoding {}", source.display()))?;
    let chunks = encoded.take_ciphertexts();
    let checksum = encoded.metadata.checksum;
    let name = encoded.metadata.name.clone();

    println!(
        "Pushing {} ({} chunks, backend: {:?})",
        source.display(),
        chunks.len(),
        config.storage.backend
    );

    let (ctx, orchestrator, pb) = open_orchestrator(config, "push").await?;
    let saved = orchestrator
        .save(&name, chunks, &checksum, expiry, permission)
        .await;
    ctx.shutdown().await;
    let ids = match saved {
        Ok(ids) => {
            pb.finish_with_message("done");
            ids
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).with_context(|| format!("uploading {}", source.display()));
        }
    };

    let size = encoded.metadata.size;
    let reference = encoded.into_reference(ids)?;
    reference
        .write_to(&ref_path)
        .with_context(|| format!("writing reference: {}", ref_path.display()))?;

    println!("  bytes:     {}", fmt_bytes(size));
    println!("  checksum:  {}", &checksum.to_hex()[..16]);
    if let Some(expiry) = expiry {
        println!("  expires:   {} (unix)", expiry.0);
    }
    println!("  reference: {}", ref_path.display());
    println!("Keep the reference file safe: without it the chunks cannot be recovered.");
    Ok(())
}

// ── `cvault pull` ─────────────────────────────────────────────────────────────

async fn cmd_pull(
    config: &VaultConfig,
    master: Option<&SecretString>,
    ref_path: &Path,
    dest: Option<&Path>,
) -> Result<()> {
    let reference = ReferenceFile::read_from(ref_path)
        .with_context(|| format!("reading reference: {}", ref_path.display()))?;
    if reference.derivation.uses_master_key() && master.is_none() {
        anyhow::bail!(
            "{} was sealed with a master passphrase: pass --master-key or --prompt",
            ref_path.display()
        );
    }

    let (ctx, orchestrator, pb) = open_orchestrator(config, "pull").await?;
    let loaded = orchestrator.load(&reference.ids).await;
    ctx.shutdown().await;
    let chunks = match loaded {
        Ok(chunks) => {
            pb.finish_with_message("downloaded");
            chunks
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).context("downloading chunks");
        }
    };

    let dest = dest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_dest(&reference));
    let bytes = cv_crypto::decode_to_path(&chunks, &reference, master, &dest)
        .with_context(|| format!("decoding into {}", dest.display()))?;

    println!("Pulled {} → {} ({})", reference.metadata.name, dest.display(), fmt_bytes(bytes));
    Ok(())
}

// ── `cvault delete` ───────────────────────────────────────────────────────────

async fn cmd_delete(config: &VaultConfig, ref_path: &Path) -> Result<()> {
    let reference = ReferenceFile::read_from(ref_path)
        .with_context(|| format!("reading reference: {}", ref_path.display()))?;

    let (ctx, orchestrator, pb) = open_orchestrator(config, "delete").await?;
    let deleted = orchestrator.delete(&reference.ids).await;
    ctx.shutdown().await;
    match deleted {
        Ok(()) => pb.finish_with_message("done"),
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).context("deleting chunks");
        }
    }

    println!(
        "Deleted {} chunks of {}; {} no longer resolves.",
        reference.ids.len(),
        reference.metadata.name,
        ref_path.display()
    );
    Ok(())
}

// ── `cvault config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    let rendered = toml::to_string_pretty(config).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}
