//! Dataset sessions: one backend client and one chunk cache per opened image.
//!
//! A session is the top-level handle a host keeps per dataset. Every
//! (channel, timepoint, level) array of the dataset gets one [`ArrayView`],
//! and all of them share the session's cache budget and connection pool.
//!
//! ```rust,ignore
//! use volume_reader::{ArrayMetadata, BackendConfig, DataType, DatasetLayout, DatasetSession, ReaderConfig};
//!
//! let backend = BackendConfig::s3_anonymous(
//!     "https://janelia-cosem.s3.amazonaws.com",
//!     "us-west-2",
//!     "jrc_hela-2",
//!     "jrc_hela-2.n5",
//! );
//! let mut layout = DatasetLayout::new();
//! layout.insert(0, 0, 0, "em/fibsem-uint16/s0",
//!     ArrayMetadata::n5(vec![6016, 800, 6250], vec![64, 64, 64], DataType::UInt16))?;
//!
//! let session = DatasetSession::open(&backend, layout, ReaderConfig::from_env())?;
//! let view = session.open_view(0, 0, 0)?;
//! let region = view.read_region(&[1024, 400, 3000], &[128, 1, 128]).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::backend::{BackendReader, ChunkSource, RetryingSource};
use crate::cache::ChunkCache;
use crate::config::{BackendConfig, ReaderConfig};
use crate::error::{Result, VolumeError};
use crate::metadata::ArrayMetadata;
use crate::types::{CacheStats, DatasetIdentity};
use crate::view::{ArrayView, ViewCoordinates};

/// (channel, timepoint, level)
type ViewIndex = (u32, u32, u32);

/// One physical array of a dataset.
#[derive(Debug, Clone)]
pub struct ArraySource {
    /// Path of the array below the backend root (e.g. "setup0/timepoint0/s2").
    pub path: String,
    pub metadata: Arc<ArrayMetadata>,
}

/// The arrays that make up a dataset, as supplied by metadata discovery.
#[derive(Debug, Clone, Default)]
pub struct DatasetLayout {
    arrays: BTreeMap<ViewIndex, ArraySource>,
}

impl DatasetLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the array for (channel, timepoint, level), replacing any
    /// previous one. Rejects inconsistent metadata.
    pub fn insert(
        &mut self,
        channel: u32,
        timepoint: u32,
        level: u32,
        path: impl Into<String>,
        metadata: ArrayMetadata,
    ) -> Result<()> {
        metadata.validate()?;
        self.arrays.insert(
            (channel, timepoint, level),
            ArraySource {
                path: path.into().trim_matches('/').to_string(),
                metadata: Arc::new(metadata),
            },
        );
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_array(
        mut self,
        channel: u32,
        timepoint: u32,
        level: u32,
        path: impl Into<String>,
        metadata: ArrayMetadata,
    ) -> Result<Self> {
        self.insert(channel, timepoint, level, path, metadata)?;
        Ok(self)
    }

    pub fn get(&self, channel: u32, timepoint: u32, level: u32) -> Option<&ArraySource> {
        self.arrays.get(&(channel, timepoint, level))
    }

    pub fn num_channels(&self) -> u32 {
        self.arrays.keys().map(|&(c, _, _)| c + 1).max().unwrap_or(0)
    }

    pub fn num_timepoints(&self) -> u32 {
        self.arrays.keys().map(|&(_, t, _)| t + 1).max().unwrap_or(0)
    }

    pub fn num_levels(&self) -> u32 {
        self.arrays.keys().map(|&(_, _, l)| l + 1).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

/// Top-level handle for one opened dataset.
///
/// Levels, channels and timepoints all share one cache. Their chunk keys
/// never collide because each key carries the array path and level.
pub struct DatasetSession {
    location_id: String,
    cache: ChunkCache,
    views: BTreeMap<ViewIndex, ArrayView>,
}

impl DatasetSession {
    /// Connect to the configured backend and prepare a view per array.
    pub fn open(backend: &BackendConfig, layout: DatasetLayout, config: ReaderConfig) -> Result<Self> {
        config.validate().map_err(VolumeError::ConfigError)?;
        let reader = BackendReader::connect(backend)?;
        Self::with_source(reader, layout, config)
    }

    /// Open a session over any chunk source.
    ///
    /// The source is wrapped with the configured retry policy.
    pub fn with_source<S>(source: S, layout: DatasetLayout, config: ReaderConfig) -> Result<Self>
    where
        S: ChunkSource + 'static,
    {
        config.validate().map_err(VolumeError::ConfigError)?;

        let source: Arc<dyn ChunkSource> = Arc::new(RetryingSource::new(source, config.retry.clone()));
        let location_id = source.location_id();
        let cache = ChunkCache::new(config.chunk_cache_size_bytes());

        let mut views = BTreeMap::new();
        for ((channel, timepoint, level), array) in layout.arrays {
            let identity = DatasetIdentity::new(format!(
                "{}/{}",
                location_id.trim_end_matches('/'),
                array.path
            ));
            let view = ArrayView::new(
                identity,
                ViewCoordinates {
                    channel,
                    timepoint,
                    level,
                },
                array.path,
                array.metadata,
                Arc::clone(&source),
                cache.clone(),
                config.fetch_concurrency,
            )?;
            views.insert((channel, timepoint, level), view);
        }

        info!(
            location = %location_id,
            arrays = views.len(),
            cache_mb = config.chunk_cache_size_mb,
            "Opened dataset session"
        );

        Ok(Self {
            location_id,
            cache,
            views,
        })
    }

    /// The view for (channel, timepoint, level).
    pub fn open_view(&self, channel: u32, timepoint: u32, level: u32) -> Result<ArrayView> {
        self.views
            .get(&(channel, timepoint, level))
            .cloned()
            .ok_or(VolumeError::ViewNotFound {
                channel,
                timepoint,
                level,
            })
    }

    /// All views, ordered by (channel, timepoint, level).
    pub fn views(&self) -> impl Iterator<Item = &ArrayView> {
        self.views.values()
    }

    /// Number of resolution levels available for a channel and timepoint.
    pub fn num_levels(&self, channel: u32, timepoint: u32) -> u32 {
        self.views
            .keys()
            .filter(|&&(c, t, _)| c == channel && t == timepoint)
            .count() as u32
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    /// The cache shared by every view of this session.
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached chunk not currently held by a reader.
    ///
    /// # Returns
    /// Tuple of (entries cleared, bytes freed)
    pub fn clear_cache(&self) -> (usize, u64) {
        self.cache.clear()
    }

    /// Tear the session down, releasing cached chunks.
    ///
    /// Views cloned out of the session keep working but refetch on demand.
    pub fn close(self) -> CacheStats {
        let stats = self.cache.stats();
        let (entries, bytes) = self.cache.clear();
        info!(
            location = %self.location_id,
            entries,
            bytes,
            hit_rate = stats.hit_rate(),
            "Closed dataset session"
        );
        stats
    }
}

impl std::fmt::Debug for DatasetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetSession")
            .field("location_id", &self.location_id)
            .field("views", &self.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemorySource;
    use crate::types::DataType;

    fn layout() -> DatasetLayout {
        let mut layout = DatasetLayout::new();
        for channel in 0..2 {
            for level in 0..3 {
                let extent = 64 >> level;
                layout
                    .insert(
                        channel,
                        0,
                        level,
                        format!("/ch{}/s{}/", channel, level),
                        ArrayMetadata::zarr(vec![extent, extent], vec![16, 16], DataType::UInt8)
                            .with_fill_value(channel as f64 + 1.0),
                    )
                    .unwrap();
            }
        }
        layout
    }

    #[test]
    fn test_layout_counts() {
        let layout = layout();
        assert_eq!(layout.len(), 6);
        assert_eq!(layout.num_channels(), 2);
        assert_eq!(layout.num_timepoints(), 1);
        assert_eq!(layout.num_levels(), 3);
        assert_eq!(layout.get(1, 0, 2).unwrap().path, "ch1/s2");
        assert!(layout.get(2, 0, 0).is_none());
    }

    #[test]
    fn test_layout_rejects_bad_metadata() {
        let mut layout = DatasetLayout::new();
        let bad = ArrayMetadata::zarr(vec![10, 10], vec![4], DataType::UInt8);
        assert!(matches!(
            layout.insert(0, 0, 0, "a", bad),
            Err(VolumeError::InvalidMetadata(_))
        ));
        assert!(layout.is_empty());
    }

    #[tokio::test]
    async fn test_open_view_and_shared_cache() {
        let session = tokio_test::assert_ok!(DatasetSession::with_source(
            MemorySource::default(),
            layout(),
            ReaderConfig::default()
        ));
        assert_eq!(session.num_levels(0, 0), 3);

        let ch0 = session.open_view(0, 0, 0).unwrap();
        let ch1 = session.open_view(1, 0, 1).unwrap();
        assert_eq!(ch1.shape(), &[32, 32]);
        assert_eq!(ch0.identity().as_str(), "memory:/ch0/s0");

        assert_eq!(ch0.read_element::<u8>(&[3, 3]).await.unwrap(), 1);
        assert_eq!(ch1.read_element::<u8>(&[3, 3]).await.unwrap(), 2);

        // Both views populate the same cache with distinct keys.
        let stats = session.cache_stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(ch0.cache_stats().entries, 2);
    }

    #[test]
    fn test_missing_view() {
        let session =
            DatasetSession::with_source(MemorySource::default(), layout(), ReaderConfig::default()).unwrap();
        assert!(matches!(
            session.open_view(0, 1, 0),
            Err(VolumeError::ViewNotFound {
                channel: 0,
                timepoint: 1,
                level: 0
            })
        ));
    }

    #[test]
    fn test_invalid_reader_config() {
        let config = ReaderConfig {
            fetch_concurrency: 0,
            ..ReaderConfig::default()
        };
        assert!(matches!(
            DatasetSession::with_source(MemorySource::default(), layout(), config),
            Err(VolumeError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let session =
            DatasetSession::with_source(MemorySource::default(), layout(), ReaderConfig::default()).unwrap();
        let view = session.open_view(0, 0, 0).unwrap();
        view.read_region(&[0, 0], &[32, 32]).await.unwrap();
        assert_eq!(session.cache_stats().entries, 4);

        assert_eq!(session.clear_cache(), (4, 4 * 256));
        assert!(session.cache().is_empty());

        view.read_region(&[0, 0], &[16, 16]).await.unwrap();
        let stats = session.close();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 5);
    }
}
