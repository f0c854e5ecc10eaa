use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Top-level client configuration (loaded from chunkvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub codec: CodecConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl VaultConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Chunk codec settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Plaintext bytes per chunk (minimum 32)
    pub chunk_size: usize,
    /// zstd-compress the stream before splitting
    pub compress: bool,
    /// zstd level (default: 3)
    pub zstd_level: i32,
    /// Lower bound of the randomized PBKDF2 round count
    pub kdf_min_rounds: u32,
    /// Upper bound of the randomized PBKDF2 round count
    pub kdf_max_rounds: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            compress: true,
            zstd_level: 3,
            kdf_min_rounds: 10_000,
            kdf_max_rounds: 13_000,
        }
    }
}

/// Worker pool and batch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Worker count (0 = cpu_count)
    pub workers: usize,
    /// Bounded job queue capacity
    pub queue_size: usize,
    /// Seconds to wait for a batch before giving up (0 = wait forever)
    pub batch_timeout_secs: u64,
    /// Capacity of the job-failure channel
    pub error_channel_size: usize,
}

impl DispatchConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_secs > 0).then(|| Duration::from_secs(self.batch_timeout_secs))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 12,
            queue_size: 50,
            batch_timeout_secs: 300,
            error_channel_size: 256,
        }
    }
}

/// Which chunk store to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One file per chunk under `root`
    Fs,
    /// S3-compatible object store via OpenDAL
    S3,
    /// Process-local OpenDAL memory service
    Memory,
    /// Remote async job API (`POST /job`, `GET /job/{id}`)
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Chunk directory for the `fs` backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 and job API connections
    pub enforce_tls: bool,
    /// Base URL of the job API
    pub job_url: String,
    /// Delay between job status polls in milliseconds
    pub poll_interval_ms: u64,
    /// Seconds before a single remote job is abandoned
    pub job_timeout_secs: u64,
}

impl StorageConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: PathBuf::from("~/.local/share/chunkvault/chunks"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "chunkvault".into(),
            enforce_tls: false,
            job_url: "http://localhost:8080".into(),
            poll_interval_ms: 250,
            job_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
