//! `object_store`-backed chunk sources (S3-compatible, filesystem, HTTP).

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use tracing::{debug, instrument};

use crate::config::{BackendConfig, ObjectStoreLocation, SourceLocation};
use crate::error::{Result, VolumeError};

use super::{ChunkSource, FetchOutcome};

/// Shared plumbing: one store client plus the dataset root prefix.
#[derive(Clone)]
struct StoreReader {
    store: Arc<dyn ObjectStore>,
    root: String,
    location_id: String,
}

impl StoreReader {
    fn new(store: Arc<dyn ObjectStore>, config: &BackendConfig) -> Self {
        Self {
            store,
            root: config.root.trim_matches('/').to_string(),
            location_id: config.location_id(),
        }
    }

    fn path(&self, key: &str) -> Path {
        let key = key.trim_start_matches('/');
        if self.root.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.root, key))
        }
    }

    #[instrument(skip(self), fields(location = %self.location_id))]
    async fn get(&self, key: &str) -> Result<FetchOutcome> {
        let location = self.path(key);

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                debug!("Chunk not stored, treating as fill value");
                return Ok(FetchOutcome::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let bytes = result.bytes().await?;
        debug!(size = bytes.len(), "Read chunk");
        Ok(FetchOutcome::Found(bytes))
    }

    #[instrument(skip(self), fields(location = %self.location_id))]
    async fn get_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        let location = self.path(key);

        match self.store.get_range(&location, range).await {
            Ok(bytes) => Ok(FetchOutcome::Found(bytes)),
            Err(object_store::Error::NotFound { .. }) => Ok(FetchOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

/// Retries belong to [`RetryingSource`](super::RetryingSource), which bounds
/// them by the reader's policy. The client itself makes a single attempt.
fn single_attempt() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    }
}

/// S3-compatible bucket, anonymous or credentialed, with a custom endpoint.
#[derive(Clone)]
pub struct ObjectStoreSource {
    reader: StoreReader,
}

impl ObjectStoreSource {
    /// Build the client. Path-style requests are used so that third-party
    /// S3-compatible hosts work without DNS bucket aliases.
    pub fn connect(location: &ObjectStoreLocation, config: &BackendConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&location.endpoint)
            .with_region(&location.region)
            .with_bucket_name(&location.bucket)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(location.allow_http)
            .with_retry(single_attempt());

        builder = match &location.credentials {
            Some(creds) => builder
                .with_access_key_id(&creds.access_key_id)
                .with_secret_access_key(&creds.secret_access_key),
            None => builder.with_skip_signature(true),
        };

        let store = builder
            .build()
            .map_err(|e| VolumeError::fatal(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self {
            reader: StoreReader::new(Arc::new(store), config),
        })
    }
}

/// Directory on the local filesystem.
#[derive(Clone)]
pub struct FilesystemSource {
    reader: StoreReader,
}

impl FilesystemSource {
    pub fn connect(path: &std::path::Path, config: &BackendConfig) -> Result<Self> {
        let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
            VolumeError::fatal(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Ok(Self {
            reader: StoreReader::new(Arc::new(store), config),
        })
    }
}

/// Plain HTTP(S) server; chunk keys are appended to the base URL.
#[derive(Clone)]
pub struct HttpRangeSource {
    reader: StoreReader,
}

impl HttpRangeSource {
    pub fn connect(url: &str, config: &BackendConfig) -> Result<Self> {
        let store = HttpBuilder::new()
            .with_url(url)
            .with_retry(single_attempt())
            .build()
            .map_err(|e| VolumeError::fatal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            reader: StoreReader::new(Arc::new(store), config),
        })
    }
}

macro_rules! impl_chunk_source {
    ($($source:ty),*) => {
        $(
            #[async_trait]
            impl ChunkSource for $source {
                async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
                    self.reader.get(key).await
                }

                async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
                    self.reader.get_range(key, range).await
                }

                fn location_id(&self) -> String {
                    self.reader.location_id.clone()
                }
            }
        )*
    };
}

impl_chunk_source!(ObjectStoreSource, FilesystemSource, HttpRangeSource);

/// The backend selected for a dataset.
#[derive(Clone)]
pub enum BackendReader {
    ObjectStore(ObjectStoreSource),
    Filesystem(FilesystemSource),
    HttpRange(HttpRangeSource),
}

impl BackendReader {
    /// Validate the configuration and build the matching source.
    pub fn connect(config: &BackendConfig) -> Result<Self> {
        config.validate().map_err(VolumeError::ConfigError)?;

        let reader = match &config.location {
            SourceLocation::ObjectStore(location) => {
                Self::ObjectStore(ObjectStoreSource::connect(location, config)?)
            }
            SourceLocation::Filesystem { path } => {
                Self::Filesystem(FilesystemSource::connect(path, config)?)
            }
            SourceLocation::Http { url } => Self::HttpRange(HttpRangeSource::connect(url, config)?),
        };

        debug!(location = %config.location_id(), "Connected backend");
        Ok(reader)
    }

    fn inner(&self) -> &dyn ChunkSource {
        match self {
            Self::ObjectStore(s) => s,
            Self::Filesystem(s) => s,
            Self::HttpRange(s) => s,
        }
    }
}

#[async_trait]
impl ChunkSource for BackendReader {
    async fn fetch(&self, key: &str) -> Result<FetchOutcome> {
        self.inner().fetch(key).await
    }

    async fn fetch_range(&self, key: &str, range: Range<usize>) -> Result<FetchOutcome> {
        self.inner().fetch_range(key, range).await
    }

    fn location_id(&self) -> String {
        self.inner().location_id()
    }
}
