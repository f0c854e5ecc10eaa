//! Shared fixtures for dispatch integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cv_crypto::{EncodeOptions, KdfParams};
use cv_dispatch::{DispatchContext, PoolConfig};
use cv_storage::{ChunkStore, ObjectMeta, StorageError, StorageResult};

/// In-memory store that behaves like a conflict-rejecting backend, with
/// optional random latency, injected failures, and stalls.
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<HashMap<String, (Vec<u8>, ObjectMeta)>>,
    failing: Mutex<HashSet<String>>,
    max_delay_ms: u64,
    stall: bool,
    pub puts: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_jitter(max_delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            max_delay_ms,
            ..Default::default()
        })
    }

    /// Every operation hangs far longer than any test waits
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            stall: true,
            ..Default::default()
        })
    }

    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(id)
    }

    pub fn meta(&self, id: &str) -> Option<ObjectMeta> {
        self.objects.lock().unwrap().get(id).map(|(_, m)| m.clone())
    }

    pub fn remove(&self, id: &str) {
        self.objects.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    async fn latency(&self, id: &str) -> StorageResult<()> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.max_delay_ms > 0 {
            let ms = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.failing.lock().unwrap().contains(id) {
            return Err(StorageError::Backend(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for MockStore {
    async fn put(&self, id: &str, data: Vec<u8>, meta: &ObjectMeta) -> StorageResult<()> {
        self.latency(id).await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(id) {
            return Err(StorageError::AlreadyExists(id.to_string()));
        }
        objects.insert(id.to_string(), (data, meta.clone()));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Vec<u8>> {
        self.latency(id).await?;
        self.objects
            .lock()
            .unwrap()
            .get(id)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.latency(id).await?;
        self.objects
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

pub fn context(workers: usize, queue_size: usize, timeout: Option<Duration>) -> Arc<DispatchContext> {
    Arc::new(
        DispatchContext::new(
            PoolConfig {
                workers,
                queue_size,
                error_channel_size: 64,
            },
            timeout,
        )
        .unwrap(),
    )
}

/// Low KDF rounds keep tests fast where the master key is not under test
pub fn fast_opts(chunk_size: usize) -> EncodeOptions {
    EncodeOptions {
        chunk_size,
        compress: false,
        zstd_level: 1,
        kdf: KdfParams {
            min_rounds: 8,
            max_rounds: 16,
        },
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
        .collect()
}
