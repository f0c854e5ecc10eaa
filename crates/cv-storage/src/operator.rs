//! OpenDAL operators for the object-store backends, plus the transport
//! policy shared by every networked store

use anyhow::{Context, Result};
use opendal::layers::{LoggingLayer, RetryLayer};
use opendal::Operator;

use cv_core::config::StorageConfig;

const MAX_RETRIES: usize = 5;

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Config {
    pub fn from_storage(storage: &StorageConfig, access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            endpoint: storage.endpoint.clone(),
            region: storage.region.clone(),
            bucket: storage.bucket.clone(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        }
    }
}

/// Refuse (`enforce_tls`) or warn about a plaintext `http://` URL.
pub fn check_transport(service: &str, url: &str, enforce_tls: bool) -> Result<()> {
    if !url.starts_with("http://") {
        return Ok(());
    }
    if enforce_tls {
        anyhow::bail!(
            "{service} uses plaintext HTTP ({url}) but storage.enforce_tls is set; \
             use an https:// URL or disable enforce_tls for local testing"
        );
    }
    tracing::warn!(%service, %url, "plaintext HTTP: chunk traffic and credentials are unencrypted");
    Ok(())
}

/// S3-compatible operator (AWS, MinIO, SeaweedFS) with request logging and
/// jittered retries. Addressing is path-style, as self-hosted endpoints need.
pub fn build_operator(cfg: &S3Config) -> Result<Operator> {
    let service = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(service)
        .with_context(|| format!("creating S3 operator for bucket {}", cfg.bucket))?
        .layer(LoggingLayer::default())
        .layer(RetryLayer::new().with_max_times(MAX_RETRIES).with_jitter())
        .finish();
    Ok(op)
}

/// Process-local operator. Contents vanish with the process.
pub fn build_memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// S3 operator for the `[storage]` section, after the transport check.
pub fn build_from_core_config(
    storage: &StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    check_transport("S3 endpoint", &storage.endpoint, storage.enforce_tls)?;
    build_operator(&S3Config::from_storage(storage, access_key_id, secret_access_key))
}
