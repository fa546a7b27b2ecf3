//! Configuration for the volume reader and its storage backend.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for caching, retries and fetch parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Memory budget for decoded chunks in megabytes.
    pub chunk_cache_size_mb: usize,

    /// Retry policy for transient backend failures.
    pub retry: RetryPolicy,

    /// Maximum number of chunk fetches one region read keeps in flight.
    pub fetch_concurrency: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_cache_size_mb: 512,
            retry: RetryPolicy::default(),
            fetch_concurrency: 16,
        }
    }
}

impl ReaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VOLUME_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.chunk_cache_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("VOLUME_FETCH_RETRIES") {
            if let Ok(retries) = val.parse() {
                config.retry.max_retries = retries;
            }
        }

        if let Ok(val) = std::env::var("VOLUME_RETRY_INITIAL_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.initial_backoff_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("VOLUME_RETRY_MAX_MS") {
            if let Ok(ms) = val.parse() {
                config.retry.max_backoff_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("VOLUME_FETCH_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.fetch_concurrency = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_cache_size_mb == 0 {
            return Err("chunk_cache_size_mb must be > 0".to_string());
        }

        if self.fetch_concurrency == 0 {
            return Err("fetch_concurrency must be > 0".to_string());
        }

        self.retry.validate()
    }

    /// Get the chunk cache size in bytes.
    pub fn chunk_cache_size_bytes(&self) -> usize {
        self.chunk_cache_size_mb * 1024 * 1024
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry (doubles each retry).
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between retries.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms must be <= max_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Where chunks are read from, plus the key prefix of the dataset root.
///
/// Immutable once a session is opened; no process-wide client state exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub location: SourceLocation,
    /// Key prefix of the dataset container (e.g. "jrc_hela-2/jrc_hela-2.n5").
    pub root: String,
}

/// Storage backend kind and its connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLocation {
    /// S3-compatible object store.
    ObjectStore(ObjectStoreLocation),
    /// Local directory.
    Filesystem { path: PathBuf },
    /// Plain HTTP(S) server.
    Http { url: String },
}

/// Connection parameters for an S3-compatible bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreLocation {
    /// Service endpoint (e.g. "https://janelia-cosem.s3.amazonaws.com").
    pub endpoint: String,
    /// Signing region (e.g. "us-west-2").
    pub region: String,
    pub bucket: String,
    /// `None` reads anonymously without signing requests.
    pub credentials: Option<StaticCredentials>,
    /// Allow plain HTTP endpoints (local MinIO).
    pub allow_http: bool,
}

/// Static access key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl BackendConfig {
    /// Anonymous, path-style access to a public S3-compatible bucket.
    pub fn s3_anonymous(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
        root: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            location: SourceLocation::ObjectStore(ObjectStoreLocation {
                allow_http: endpoint.starts_with("http://"),
                endpoint,
                region: region.into(),
                bucket: bucket.into(),
                credentials: None,
            }),
            root: root.into(),
        }
    }

    /// A dataset below a local directory.
    pub fn filesystem(path: impl Into<PathBuf>, root: impl Into<String>) -> Self {
        Self {
            location: SourceLocation::Filesystem { path: path.into() },
            root: root.into(),
        }
    }

    /// A dataset served over HTTP(S).
    pub fn http(url: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            location: SourceLocation::Http { url: url.into() },
            root: root.into(),
        }
    }

    /// Create an object-store config from environment variables.
    ///
    /// Credentials are attached only when both `S3_ACCESS_KEY` and
    /// `S3_SECRET_KEY` are set; otherwise access is anonymous.
    pub fn from_env() -> Self {
        let credentials = match (std::env::var("S3_ACCESS_KEY"), std::env::var("S3_SECRET_KEY")) {
            (Ok(access_key_id), Ok(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        Self {
            location: SourceLocation::ObjectStore(ObjectStoreLocation {
                endpoint: std::env::var("S3_ENDPOINT")
                    .unwrap_or_else(|_| "https://s3.amazonaws.com".to_string()),
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                bucket: std::env::var("S3_BUCKET").unwrap_or_default(),
                credentials,
                allow_http: std::env::var("S3_ALLOW_HTTP")
                    .map(|v| v.to_lowercase() == "true" || v == "1")
                    .unwrap_or(false),
            }),
            root: std::env::var("VOLUME_ROOT").unwrap_or_default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        match &self.location {
            SourceLocation::ObjectStore(s3) => {
                if s3.endpoint.is_empty() {
                    return Err("object store endpoint must not be empty".to_string());
                }
                if s3.bucket.is_empty() {
                    return Err("object store bucket must not be empty".to_string());
                }
                if s3.endpoint.starts_with("http://") && !s3.allow_http {
                    return Err(format!(
                        "endpoint {} is plain HTTP but allow_http is false",
                        s3.endpoint
                    ));
                }
            }
            SourceLocation::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem path must not be empty".to_string());
                }
            }
            SourceLocation::Http { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("{} is not an http(s) URL", url));
                }
            }
        }
        Ok(())
    }

    /// Stable description of the backend location, used in dataset identities.
    pub fn location_id(&self) -> String {
        let root = self.root.trim_matches('/');
        match &self.location {
            SourceLocation::ObjectStore(s3) => {
                format!("s3:{}/{}/{}", s3.endpoint.trim_end_matches('/'), s3.bucket, root)
            }
            SourceLocation::Filesystem { path } => format!("file:{}/{}", path.display(), root),
            SourceLocation::Http { url } => format!("http:{}/{}", url.trim_end_matches('/'), root),
        }
    }
}
