//! In-memory chunk source for unit tests.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, VolumeError};

use super::{ChunkSource, FetchOutcome};

#[derive(Default)]
pub(crate) struct MemorySource {
    objects: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, VolumeError>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub(crate) fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        self.objects.lock().insert(key.into(), bytes.into());
    }

    /// Make every fetch of `key` fail with `error`.
    pub(crate) fn fail(&self, key: impl Into<String>, error: VolumeError) {
        self.failures.lock().insert(key.into(), error);
    }

    pub(crate) fn heal(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().get(key) {
            return Err(err.clone());
        }
        Ok(match self.objects.lock().get(key) {
            Some(bytes) => FetchOutcome::Found(bytes.clone()),
            None => FetchOutcome::NotFound,
        })
    }

    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        Ok(match self.fetch(key).await? {
            FetchOutcome::Found(bytes) if range.end <= bytes.len() => {
                FetchOutcome::Found(bytes.slice(range))
            }
            FetchOutcome::Found(bytes) => {
                return Err(VolumeError::fatal(format!(
                    "range {:?} beyond object of {} bytes",
                    range,
                    bytes.len()
                )))
            }
            FetchOutcome::NotFound => FetchOutcome::NotFound,
        })
    }

    fn location_id(&self) -> String {
        "memory:".to_string()
    }
}
