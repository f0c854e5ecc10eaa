//! Chunk store backed by a remote asynchronous job API
//!
//! Protocol:
//! - `POST /job` `{command, args}` → `202 {id}`; `409` when an upload
//!   targets an existing chunk, `404` when a download/delete targets a
//!   missing one
//! - `GET /job/{id}` → `202` while pending, `200 {complete, error, data,
//!   checksum}` once finished; any other status is a hard failure
//!
//! `data` is base64, `checksum` is the BLAKE3 hex digest of the raw bytes.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use cv_core::{Expiry, Permission};

use crate::error::{StorageError, StorageResult};
use crate::store::{ChunkStore, ObjectMeta};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobCommand {
    Upload,
    Download,
    Delete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArgs {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<Expiry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub command: JobCommand,
    pub args: JobArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub complete: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpJobStore {
    client: reqwest::Client,
    base: String,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl HttpJobStore {
    /// `job_timeout` of zero waits on a job indefinitely.
    pub fn new(
        base_url: impl Into<String>,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
            job_timeout,
        })
    }

    /// Build from the `[storage]` section, applying the same TLS policy as
    /// the S3 operator.
    pub fn from_config(storage: &cv_core::config::StorageConfig) -> anyhow::Result<Self> {
        crate::operator::check_transport("job API", &storage.job_url, storage.enforce_tls)?;
        Ok(Self::new(
            storage.job_url.clone(),
            storage.poll_interval(),
            storage.job_timeout(),
        )?)
    }

    async fn submit(&self, command: JobCommand, args: JobArgs) -> StorageResult<String> {
        let chunk = args.id.clone();
        let resp = self
            .client
            .post(format!("{}/job", self.base))
            .json(&JobRequest { command, args })
            .send()
            .await?;

        match resp.status() {
            StatusCode::ACCEPTED => Ok(resp.json::<JobAccepted>().await?.id),
            StatusCode::CONFLICT => Err(StorageError::AlreadyExists(chunk)),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(chunk)),
            status => Err(StorageError::JobFailed {
                job: format!("{command:?}:{chunk}"),
                reason: format!("POST /job answered {status}"),
            }),
        }
    }

    async fn poll(&self, job: &str) -> StorageResult<JobResult> {
        let url = format!("{}/job/{job}", self.base);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let resp = self.client.get(&url).send().await?;
            match resp.status() {
                StatusCode::ACCEPTED => continue,
                StatusCode::OK => {
                    let result: JobResult = resp.json().await?;
                    if let Some(reason) = result.error.as_ref().filter(|e| !e.is_empty()) {
                        return Err(StorageError::JobFailed {
                            job: job.to_string(),
                            reason: reason.clone(),
                        });
                    }
                    if !result.complete {
                        return Err(StorageError::JobFailed {
                            job: job.to_string(),
                            reason: "job finished without completing".into(),
                        });
                    }
                    return Ok(result);
                }
                status => {
                    return Err(StorageError::JobFailed {
                        job: job.to_string(),
                        reason: format!("GET /job/{job} answered {status}"),
                    })
                }
            }
        }
    }

    async fn run(&self, command: JobCommand, args: JobArgs) -> StorageResult<JobResult> {
        let chunk = args.id.clone();
        let job = self.submit(command, args).await?;
        debug!(?command, chunk = %chunk, job = %job, "job accepted");

        if self.job_timeout.is_zero() {
            return self.poll(&job).await;
        }
        tokio::time::timeout(self.job_timeout, self.poll(&job))
            .await
            .map_err(|_| StorageError::Timeout(self.job_timeout))?
    }
}

#[async_trait]
impl ChunkStore for HttpJobStore {
    async fn put(&self, id: &str, data: Vec<u8>, meta: &ObjectMeta) -> StorageResult<()> {
        let args = JobArgs {
            id: id.to_string(),
            checksum: Some(blake3::hash(&data).to_hex().to_string()),
            data: Some(STANDARD.encode(&data)),
            expiry: meta.expiry,
            permission: meta.permission.clone(),
        };
        self.run(JobCommand::Upload, args).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Vec<u8>> {
        let args = JobArgs {
            id: id.to_string(),
            ..Default::default()
        };
        let result = self.run(JobCommand::Download, args).await?;

        let encoded = result.data.ok_or_else(|| StorageError::JobFailed {
            job: id.to_string(),
            reason: "download result carries no data".into(),
        })?;
        let data = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| StorageError::Backend(format!("decoding chunk {id}: {e}")))?;

        if let Some(expected) = result.checksum {
            if blake3::hash(&data).to_hex().as_str() != expected {
                return Err(StorageError::Integrity(id.to_string()));
            }
        }
        Ok(data)
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let args = JobArgs {
            id: id.to_string(),
            ..Default::default()
        };
        self.run(JobCommand::Delete, args).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
