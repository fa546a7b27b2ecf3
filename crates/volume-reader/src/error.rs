//! Error types for chunked volume access.

use thiserror::Error;

use crate::types::DataType;

/// Errors that can occur while reading a chunked volume.
///
/// Errors are `Clone` because a single failed chunk fetch is published to
/// every reader waiting on that chunk.
#[derive(Error, Debug, Clone)]
pub enum VolumeError {
    /// The requested region is empty, has the wrong rank, or leaves the array.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Network, timeout or server-side failure. Retryable.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Configuration or authentication failure. Never retried.
    #[error("fatal backend error: {0}")]
    Fatal(String),

    /// Chunk bytes could not be decoded into the declared chunk layout.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    /// A region read failed because one of its chunks failed.
    #[error("region unavailable, chunk {key} failed: {source}")]
    RegionUnavailable {
        key: String,
        #[source]
        source: Box<VolumeError>,
    },

    /// Array metadata is inconsistent or unsupported.
    #[error("invalid array metadata: {0}")]
    InvalidMetadata(String),

    /// Reader or backend configuration is invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// No array is registered for the requested view.
    #[error("no array for channel {channel}, timepoint {timepoint}, level {level}")]
    ViewNotFound {
        channel: u32,
        timepoint: u32,
        level: u32,
    },

    /// The caller asked for a different element type than the array stores.
    #[error("data type mismatch: array holds {actual}, requested {requested}")]
    TypeMismatch {
        actual: DataType,
        requested: DataType,
    },
}

impl VolumeError {
    /// Create an InvalidRegion error.
    pub fn invalid_region(msg: impl Into<String>) -> Self {
        Self::InvalidRegion(msg.into())
    }

    /// Create a Transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a Fatal error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a CorruptChunk error.
    pub fn corrupt_chunk(msg: impl Into<String>) -> Self {
        Self::CorruptChunk(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Wrap a chunk failure as the failure of the region that needed it.
    pub fn region_unavailable(key: impl ToString, cause: VolumeError) -> Self {
        Self::RegionUnavailable {
            key: key.to_string(),
            source: Box::new(cause),
        }
    }

    /// Whether a retry of the same backend request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The innermost error, looking through `RegionUnavailable` wrappers.
    pub fn root_cause(&self) -> &VolumeError {
        match self {
            Self::RegionUnavailable { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for VolumeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::Fatal(err.to_string()),
            _ => Self::Transient(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for VolumeError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// HTTP status lines that mean the credentials (or their absence) were refused.
const AUTH_REJECTIONS: [&str; 2] = ["401 Unauthorized", "403 Forbidden"];

impl From<object_store::Error> for VolumeError {
    fn from(err: object_store::Error) -> Self {
        use object_store::Error as StoreError;

        match &err {
            StoreError::InvalidPath { .. }
            | StoreError::NotSupported { .. }
            | StoreError::NotImplemented
            | StoreError::UnknownConfigurationKey { .. } => Self::Fatal(err.to_string()),
            _ => {
                let msg = err.to_string();
                // S3 reports rejected credentials as a generic HTTP error.
                // Match the status line only: keys and endpoints in the
                // message may contain the same digits.
                if AUTH_REJECTIONS.iter().any(|status| msg.contains(status)) {
                    Self::Fatal(msg)
                } else {
                    Self::Transient(msg)
                }
            }
        }
    }
}

/// Result type for volume reader operations.
pub type Result<T> = std::result::Result<T, VolumeError>;
