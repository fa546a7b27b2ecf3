//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use test_utils::N5DatasetWriter;
use tracing_subscriber::EnvFilter;
use volume_reader::{ChunkSource, FetchOutcome, ReaderConfig, Result, RetryPolicy, VolumeError};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Reader config with fast retries so failure tests stay quick.
pub fn test_config(max_retries: u32) -> ReaderConfig {
    ReaderConfig {
        chunk_cache_size_mb: 64,
        retry: RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        fetch_concurrency: 8,
    }
}

type Generator = Arc<dyn Fn(&[u64]) -> u16 + Send + Sync>;

struct SyntheticArray {
    path: String,
    writer: N5DatasetWriter,
    value: Generator,
}

/// In-memory N5 backend that encodes blocks on request.
///
/// All-zero blocks are reported as missing, like a sparse writer would leave
/// them. Every fetch is counted, and failures can be scripted per key.
#[derive(Default)]
pub struct SyntheticSource {
    arrays: Vec<SyntheticArray>,
    latency: Option<Duration>,
    fetches: AtomicUsize,
    per_key: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, (usize, VolumeError)>>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a `uint16` N5 array under `path`.
    pub fn with_array(
        mut self,
        path: &str,
        dimensions: &[u64],
        block_size: &[u64],
        value: impl Fn(&[u64]) -> u16 + Send + Sync + 'static,
    ) -> Self {
        self.arrays.push(SyntheticArray {
            path: path.trim_matches('/').to_string(),
            writer: N5DatasetWriter::new(dimensions, block_size).skip_empty_blocks(true),
            value: Arc::new(value),
        });
        self
    }

    /// Delay every fetch, to widen race windows.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `times` fetches of `key` with `error`.
    pub fn fail(&self, key: &str, times: usize, error: VolumeError) {
        self.failures.lock().insert(key.to_string(), (times, error));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetches_of(&self, key: &str) -> usize {
        self.per_key.lock().get(key).copied().unwrap_or(0)
    }

    fn scripted_failure(&self, key: &str) -> Option<VolumeError> {
        let mut failures = self.failures.lock();
        let (remaining, error) = failures.get_mut(key)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }

    fn encode(&self, key: &str) -> Result<FetchOutcome> {
        for array in &self.arrays {
            let Some(block_key) = key.strip_prefix(&array.path).and_then(|k| k.strip_prefix('/')) else {
                continue;
            };
            let index: Vec<u64> = block_key
                .split('/')
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VolumeError::fatal(format!("bad block key {}: {}", key, e)))?;

            return match array.writer.block(&index, &*array.value) {
                Ok(Some(block)) => Ok(FetchOutcome::Found(Bytes::from(block))),
                Ok(None) | Err(_) => Ok(FetchOutcome::NotFound),
            };
        }
        Ok(FetchOutcome::NotFound)
    }
}

#[async_trait]
impl ChunkSource for SyntheticSource {
    async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.per_key.lock().entry(key.to_string()).or_default() += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.scripted_failure(key) {
            return Err(error);
        }
        self.encode(key)
    }

    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        match self.fetch(key).await? {
            FetchOutcome::Found(bytes) => Ok(FetchOutcome::Found(bytes.slice(range))),
            FetchOutcome::NotFound => Ok(FetchOutcome::NotFound),
        }
    }

    fn location_id(&self) -> String {
        "synthetic:".to_string()
    }
}

/// A shareable handle, so tests can inspect counters after handing the
/// source to a session.
#[derive(Clone)]
pub struct SharedSource(pub Arc<SyntheticSource>);

#[async_trait]
impl ChunkSource for SharedSource {
    async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
        self.0.fetch(key).await
    }

    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        self.0.fetch_range(key, range).await
    }

    fn location_id(&self) -> String {
        self.0.location_id()
    }
}
