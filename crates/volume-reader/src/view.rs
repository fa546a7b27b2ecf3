//! Lazy view over one (channel, timepoint, level) array of a dataset.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::backend::{ChunkSource, FetchOutcome};
use crate::buffer::{ArrayBuffer, DecodedChunk, RegionBuffer};
use crate::cache::{ChunkCache, ChunkRef};
use crate::codec::{decode_chunk, fill_chunk};
use crate::error::{Result, VolumeError};
use crate::grid::ChunkGrid;
use crate::layout::{self, BlockRef};
use crate::metadata::ArrayMetadata;
use crate::types::{CacheStats, ChunkKey, DataType, DatasetIdentity, Element};

/// Read access to one chunked array.
///
/// Views are cheap to clone. Every clone, and every other view of the same
/// session, shares the session's chunk cache and backend client. Reads never
/// touch the backend for chunks that are already cached.
#[derive(Clone)]
pub struct ArrayView {
    identity: DatasetIdentity,
    channel: u32,
    timepoint: u32,
    level: u32,
    array_path: String,
    metadata: Arc<ArrayMetadata>,
    grid: ChunkGrid,
    source: Arc<dyn ChunkSource>,
    cache: ChunkCache,
    fetch_concurrency: usize,
}

/// Where a view sits inside its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViewCoordinates {
    pub channel: u32,
    pub timepoint: u32,
    pub level: u32,
}

impl ArrayView {
    pub(crate) fn new(
        identity: DatasetIdentity,
        coords: ViewCoordinates,
        array_path: String,
        metadata: Arc<ArrayMetadata>,
        source: Arc<dyn ChunkSource>,
        cache: ChunkCache,
        fetch_concurrency: usize,
    ) -> Result<Self> {
        metadata.validate()?;
        let grid = ChunkGrid::new(metadata.shape.clone(), metadata.chunk_shape.clone())?;

        Ok(Self {
            identity,
            channel: coords.channel,
            timepoint: coords.timepoint,
            level: coords.level,
            array_path,
            metadata,
            grid,
            source,
            cache,
            fetch_concurrency: fetch_concurrency.max(1),
        })
    }

    /// Read a region into a newly allocated buffer shaped like `size`.
    ///
    /// The buffer uses the array's memory order.
    pub async fn read_region(&self, offset: &[u64], size: &[u64]) -> Result<RegionBuffer> {
        self.grid.validate_region(offset, size)?;

        let len = self.region_size_bytes(size)?;
        let mut data = vec![0u8; len];
        self.read_region_into(offset, size, &mut data).await?;

        ArrayBuffer::from_bytes(data, size.to_vec(), self.metadata.data_type, self.metadata.order)
    }

    /// Read a region into a caller-provided buffer of native-endian elements
    /// laid out in the array's memory order.
    ///
    /// Chunks are fetched concurrently and copied as they arrive. If any chunk
    /// fails, the error names that chunk and the contents of `out` are
    /// unspecified.
    #[instrument(skip(self, out), fields(dataset = %self.identity, level = self.level))]
    pub async fn read_region_into(&self, offset: &[u64], size: &[u64], out: &mut [u8]) -> Result<()> {
        let intersections = self.grid.intersections(offset, size)?;

        let expected = self.region_size_bytes(size)?;
        if out.len() != expected {
            return Err(VolumeError::invalid_region(format!(
                "output buffer holds {} bytes, region {:?} needs {}",
                out.len(),
                size,
                expected
            )));
        }

        debug!(chunks = intersections.len(), "Reading region");

        let elem = self.metadata.data_type.size();
        let order = self.metadata.order;

        let mut chunks = stream::iter(intersections)
            .map(|ix| async move {
                let chunk = self.chunk(&ix.index).await;
                (ix, chunk)
            })
            .buffer_unordered(self.fetch_concurrency);

        while let Some((ix, chunk)) = chunks.next().await {
            let chunk = chunk.map_err(|e| self.unavailable(&ix.index, e))?;
            layout::copy_block(
                BlockRef {
                    data: chunk.as_bytes(),
                    shape: chunk.shape(),
                    offset: &ix.chunk_offset,
                },
                BlockRef {
                    data: &mut *out,
                    shape: size,
                    offset: &ix.region_offset,
                },
                &ix.extent,
                order,
                elem,
            );
        }

        Ok(())
    }

    /// Read a single element.
    pub async fn read_element<T: Element>(&self, coord: &[u64]) -> Result<T> {
        if T::DATA_TYPE != self.metadata.data_type {
            return Err(VolumeError::TypeMismatch {
                actual: self.metadata.data_type,
                requested: T::DATA_TYPE,
            });
        }

        let (index, local) = self.grid.chunk_index_of(coord)?;
        let chunk = self
            .chunk(&index)
            .await
            .map_err(|e| self.unavailable(&index, e))?;
        chunk.get::<T>(&local)
    }

    /// The decoded chunk at `index`, from the cache or the backend.
    ///
    /// The returned handle pins the chunk in the cache until dropped.
    pub async fn chunk(&self, index: &[u64]) -> Result<ChunkRef> {
        if !self.grid.contains_index(index) {
            return Err(VolumeError::invalid_region(format!(
                "chunk index {:?} outside grid {:?}",
                index,
                self.grid.num_chunks()
            )));
        }

        let key = ChunkKey::new(self.identity.clone(), self.level, index.to_vec());
        self.cache
            .get_or_fetch(key, || {
                let path = self.metadata.key_encoding.encode(&self.array_path, index);
                load_chunk(Arc::clone(&self.source), path, Arc::clone(&self.metadata))
            })
            .await
    }

    /// Warm the cache with every chunk of a region.
    ///
    /// Failures are logged, not returned. Returns the number of chunks that
    /// are now cached.
    pub async fn prefetch(&self, offset: &[u64], size: &[u64]) -> usize {
        let intersections = match self.grid.intersections(offset, size) {
            Ok(intersections) => intersections,
            Err(e) => {
                warn!(dataset = %self.identity, error = %e, "Skipping prefetch of invalid region");
                return 0;
            }
        };

        stream::iter(intersections)
            .map(|ix| async move {
                match self.chunk(&ix.index).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(
                            dataset = %self.identity,
                            level = self.level,
                            chunk = ?ix.index,
                            error = %e,
                            "Failed to prefetch chunk"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.fetch_concurrency)
            .filter(|loaded| futures::future::ready(*loaded))
            .count()
            .await
    }

    fn region_size_bytes(&self, size: &[u64]) -> Result<usize> {
        size.iter()
            .try_fold(self.metadata.data_type.size() as u64, |acc, &s| acc.checked_mul(s))
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| VolumeError::invalid_region(format!("region {:?} is too large", size)))
    }

    fn unavailable(&self, index: &[u64], cause: VolumeError) -> VolumeError {
        if matches!(cause, VolumeError::InvalidRegion(_)) {
            return cause;
        }
        VolumeError::region_unavailable(
            ChunkKey::new(self.identity.clone(), self.level, index.to_vec()),
            cause,
        )
    }

    pub fn identity(&self) -> &DatasetIdentity {
        &self.identity
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn timepoint(&self) -> u32 {
        self.timepoint
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn shape(&self) -> &[u64] {
        self.grid.shape()
    }

    pub fn chunk_shape(&self) -> &[u64] {
        self.grid.chunk_shape()
    }

    pub fn data_type(&self) -> DataType {
        self.metadata.data_type
    }

    /// Statistics of the cache shared with the rest of the session.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for ArrayView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayView")
            .field("identity", &self.identity)
            .field("channel", &self.channel)
            .field("timepoint", &self.timepoint)
            .field("level", &self.level)
            .field("shape", &self.metadata.shape)
            .field("chunk_shape", &self.metadata.chunk_shape)
            .field("data_type", &self.metadata.data_type)
            .finish()
    }
}

/// Fetch one chunk and decode it off the async executor.
async fn load_chunk(
    source: Arc<dyn ChunkSource>,
    path: String,
    metadata: Arc<ArrayMetadata>,
) -> Result<DecodedChunk> {
    match source.fetch(&path).await? {
        FetchOutcome::Found(bytes) => tokio::task::spawn_blocking(move || decode_chunk(&bytes, &metadata))
            .await
            .map_err(|e| VolumeError::fatal(format!("decode task for {} failed: {}", path, e)))?,
        FetchOutcome::NotFound => Ok(fill_chunk(&metadata)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemorySource;

    const SHAPE: [u64; 2] = [10, 7];
    const CHUNK: [u64; 2] = [4, 3];

    fn value(y: u64, x: u64) -> u16 {
        (y * 100 + x) as u16
    }

    /// Little-endian C-order bytes of chunk (cy, cx); positions outside the
    /// array hold zero, as Zarr writers leave them.
    fn chunk_bytes(cy: u64, cx: u64) -> Vec<u8> {
        let mut bytes = Vec::new();
        for ly in 0..CHUNK[0] {
            for lx in 0..CHUNK[1] {
                let (y, x) = (cy * CHUNK[0] + ly, cx * CHUNK[1] + lx);
                let v = if y < SHAPE[0] && x < SHAPE[1] { value(y, x) } else { 0 };
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        bytes
    }

    /// A 10x7 u16 array; chunk (1, 1) is not stored and reads as 9.
    fn view() -> (ArrayView, Arc<MemorySource>) {
        let source = Arc::new(MemorySource::default());
        for cy in 0..3 {
            for cx in 0..3 {
                if (cy, cx) != (1, 1) {
                    source.insert(format!("c0/{}.{}", cy, cx), chunk_bytes(cy, cx));
                }
            }
        }

        let metadata = ArrayMetadata::zarr(SHAPE.to_vec(), CHUNK.to_vec(), DataType::UInt16)
            .with_fill_value(9.0);
        let view = ArrayView::new(
            DatasetIdentity::new("memory:/c0"),
            ViewCoordinates {
                channel: 0,
                timepoint: 0,
                level: 0,
            },
            "c0".to_string(),
            Arc::new(metadata),
            source.clone(),
            ChunkCache::new(1 << 20),
            4,
        )
        .unwrap();
        (view, source)
    }

    fn expected(y: u64, x: u64) -> u16 {
        if (4..8).contains(&y) && (3..6).contains(&x) {
            9
        } else {
            value(y, x)
        }
    }

    #[tokio::test]
    async fn test_read_full_array() {
        let (view, _) = view();
        let region = view.read_region(&[0, 0], &SHAPE).await.unwrap();

        assert_eq!(region.shape(), &SHAPE);
        for y in 0..SHAPE[0] {
            for x in 0..SHAPE[1] {
                assert_eq!(region.get::<u16>(&[y, x]).unwrap(), expected(y, x), "at ({y}, {x})");
            }
        }
    }

    #[tokio::test]
    async fn test_read_region_across_chunk_boundaries() {
        let (view, source) = view();
        let region = view.read_region(&[2, 1], &[7, 5]).await.unwrap();

        let values = region.to_vec::<u16>().unwrap();
        let want: Vec<u16> = (2..9)
            .flat_map(|y| (1..6).map(move |x| expected(y, x)))
            .collect();
        assert_eq!(values, want);
        // Rows 2..9 touch chunk rows 0..=2, columns 1..6 touch chunk columns 0..=1.
        assert_eq!(source.fetches(), 6);
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let (view, source) = view();
        let first = view.read_region(&[0, 0], &[5, 5]).await.unwrap();
        let fetches = source.fetches();

        let second = view.read_region(&[0, 0], &[5, 5]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetches(), fetches);
        assert!(view.cache_stats().hits >= 4);
    }

    #[tokio::test]
    async fn test_read_element() {
        let (view, _) = view();
        assert_eq!(view.read_element::<u16>(&[9, 6]).await.unwrap(), 906);
        assert_eq!(view.read_element::<u16>(&[5, 4]).await.unwrap(), 9);

        let err = view.read_element::<f32>(&[0, 0]).await.unwrap_err();
        assert!(matches!(err, VolumeError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_invalid_region_is_not_wrapped() {
        let (view, source) = view();

        for (offset, size) in [([0u64, 0], [11u64, 1]), ([0, 0], [1, 0]), ([9, 6], [1, 2])] {
            let err = view.read_region(&offset, &size).await.unwrap_err();
            assert!(matches!(err, VolumeError::InvalidRegion(_)), "{offset:?}+{size:?}");
        }
        assert!(matches!(
            view.read_region(&[0], &[1]).await,
            Err(VolumeError::InvalidRegion(_))
        ));
        assert!(matches!(
            view.read_element::<u16>(&[10, 0]).await,
            Err(VolumeError::InvalidRegion(_))
        ));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_read_into_checks_buffer_length() {
        let (view, _) = view();
        let mut out = vec![0u8; 7];
        let err = view.read_region_into(&[0, 0], &[2, 2], &mut out).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidRegion(_)));
    }

    #[tokio::test]
    async fn test_failed_chunk_names_key_and_cause() {
        let (view, source) = view();
        source.fail("c0/2.0", VolumeError::fatal("403 Forbidden"));

        let err = view.read_region(&[0, 0], &SHAPE).await.unwrap_err();
        match &err {
            VolumeError::RegionUnavailable { key, .. } => assert!(key.ends_with("@s0[2,0]"), "{key}"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(err.root_cause(), VolumeError::Fatal(_)));

        // The failure is not cached: a later read fetches again and succeeds.
        source.heal("c0/2.0");
        assert_eq!(view.read_element::<u16>(&[8, 0]).await.unwrap(), 800);
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_reported() {
        let (view, source) = view();
        source.insert("c0/0.0", vec![1u8, 2, 3]);

        let err = view.read_element::<u16>(&[0, 0]).await.unwrap_err();
        assert!(matches!(err.root_cause(), VolumeError::CorruptChunk(_)));
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let (view, source) = view();
        assert_eq!(view.prefetch(&[0, 0], &[8, 6]).await, 4);
        let fetches = source.fetches();

        view.read_region(&[1, 1], &[6, 4]).await.unwrap();
        assert_eq!(source.fetches(), fetches);

        source.fail("c0/2.2", VolumeError::transient("timeout"));
        assert_eq!(view.prefetch(&[8, 0], &[2, 7]).await, 2);
        assert_eq!(view.prefetch(&[0, 0], &[0, 0]).await, 0);
    }

    #[tokio::test]
    async fn test_chunk_index_outside_grid() {
        let (view, _) = view();
        assert!(matches!(view.chunk(&[3, 0]).await, Err(VolumeError::InvalidRegion(_))));
        let chunk = view.chunk(&[2, 2]).await.unwrap();
        assert_eq!(chunk.shape(), &CHUNK);
        assert_eq!(chunk.get::<u16>(&[1, 0]).unwrap(), 906);
    }
}
