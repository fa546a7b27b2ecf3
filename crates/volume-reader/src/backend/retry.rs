//! Retry and fatal-error short-circuit around a chunk source.

use std::ops::Range;
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::error::{Result, VolumeError};

use super::{ChunkSource, FetchOutcome};

/// Wraps a source with bounded exponential backoff.
///
/// `Transient` errors are retried up to `max_retries` times. The first
/// `Fatal` error is latched: every later request fails immediately with the
/// same error, without touching the backend.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    fatal: OnceLock<VolumeError>,
}

impl<S: ChunkSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            fatal: OnceLock::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The latched fatal error, if one has occurred.
    pub fn fatal_error(&self) -> Option<&VolumeError> {
        self.fatal.get()
    }

    async fn with_retry<F, Fut>(&self, key: &str, mut attempt: F) -> Result<FetchOutcome>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<FetchOutcome>>,
    {
        if let Some(err) = self.fatal.get() {
            return Err(err.clone());
        }

        let mut retries = 0;
        let mut delay = self.policy.initial_backoff();

        loop {
            match attempt().await {
                Ok(outcome) => return Ok(outcome),
                Err(e @ VolumeError::Fatal(_)) => {
                    error!(key = %key, error = %e, "Fatal backend error, disabling further fetches");
                    let _ = self.fatal.set(e.clone());
                    return Err(e);
                }
                Err(e) if e.is_retryable() && retries < self.policy.max_retries => {
                    retries += 1;
                    warn!(
                        key = %key,
                        error = %e,
                        retry = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Chunk fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.policy.max_backoff());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for RetryingSource<S> {
    async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
        self.with_retry(key, || self.inner.fetch(key)).await
    }

    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        self.with_retry(key, || self.inner.fetch_range(key, range.clone()))
            .await
    }

    fn location_id(&self) -> String {
        self.inner.location_id()
    }
}
