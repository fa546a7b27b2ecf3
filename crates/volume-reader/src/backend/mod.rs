//! Storage backends that fetch raw chunk bytes.
//!
//! A backend is selected once, when a dataset is opened, from a
//! [`BackendConfig`](crate::config::BackendConfig). Every variant speaks to
//! storage through one shared `object_store` client, so connection pooling is
//! dataset-wide.

#[cfg(test)]
pub(crate) mod memory;
mod retry;
mod store;

pub use retry::RetryingSource;
pub use store::{BackendReader, FilesystemSource, HttpRangeSource, ObjectStoreSource};

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Result of a successful backend request.
///
/// A missing chunk is an expected outcome for sparse datasets, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(Bytes),
    NotFound,
}

/// Fetches raw chunk bytes by storage key.
///
/// Implementations are stateless per call and must tolerate concurrent use.
/// Errors are either `Transient` (retryable) or `Fatal`.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch the object stored under `key`, relative to the dataset root.
    async fn fetch(&self, key: &str) -> Result<FetchOutcome>;

    /// Fetch a byte range of the object stored under `key`.
    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome>;

    /// Stable description of where this source reads from.
    fn location_id(&self) -> String;
}
