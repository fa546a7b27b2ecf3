//! Chunked Volume Access Layer for N5 and Zarr Arrays
//!
//! This crate provides random-access reads over large N-dimensional image
//! volumes stored as chunks in S3-compatible object stores, on local disk or
//! behind plain HTTP. It enables:
//!
//! - **Partial reads**: Only fetch the chunks a region actually touches
//! - **Single-flight caching**: Concurrent readers of one chunk share one fetch
//! - **Bounded memory**: LRU eviction of decoded chunks, never of chunks in use
//! - **Sparse datasets**: Missing chunks read as the array's fill value
//!
//! # Architecture
//!
//! ```text
//! Host request
//!      │
//!      ▼
//! DatasetSession::open_view(channel, timepoint, level)
//!      │
//!      ▼
//! ArrayView::read_region(offset, size)
//!      │
//!      ├─► ChunkGrid: chunks intersecting the region (pure arithmetic)
//!      │
//!      ├─► ChunkCache::get_or_fetch for each chunk (concurrently)
//!      │         │
//!      │         ├─► Ready: shared decoded chunk, no I/O
//!      │         │
//!      │         ├─► Pending: wait for the fetch already in flight
//!      │         │
//!      │         └─► Absent: ChunkSource::fetch ─► decode_chunk
//!      │                       (NotFound ─► fill_chunk)
//!      │
//!      └─► Copy each chunk's intersection into the region buffer
//!               │
//!               ▼
//!          RegionBuffer
//! ```
//!
//! # Example
//!
//! ```ignore
//! use volume_reader::{ArrayMetadata, BackendConfig, DataType, DatasetLayout, DatasetSession, ReaderConfig};
//!
//! let backend = BackendConfig::s3_anonymous(
//!     "https://s3.embl.de",
//!     "us-west-2",
//!     "i2k-2020",
//!     "spatial-transcriptomics-example/pos42/images/ome-zarr/MMStack_Pos42.ome.zarr",
//! );
//! let layout = DatasetLayout::new().with_array(
//!     0, 0, 0, "s0",
//!     ArrayMetadata::zarr(vec![6, 2048, 2048], vec![1, 512, 512], DataType::UInt16),
//! )?;
//!
//! let session = DatasetSession::open(&backend, layout, ReaderConfig::default())?;
//! let value: u16 = session.open_view(0, 0, 0)?.read_element(&[4, 397, 992]).await?;
//! ```

pub mod backend;
pub mod buffer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod grid;
mod layout;
pub mod metadata;
pub mod session;
pub mod types;
pub mod view;

// Re-export commonly used types at crate root
pub use backend::{BackendReader, ChunkSource, FetchOutcome, RetryingSource};
pub use buffer::{ArrayBuffer, DecodedChunk, RegionBuffer};
pub use cache::{ChunkCache, ChunkRef};
pub use codec::{decode_chunk, fill_chunk};
pub use config::{BackendConfig, ReaderConfig, RetryPolicy, SourceLocation};
pub use error::{Result, VolumeError};
pub use grid::{ChunkGrid, ChunkIntersection};
pub use metadata::ArrayMetadata;
pub use session::{ArraySource, DatasetLayout, DatasetSession};
pub use types::{
    CacheStats, ChunkFormat, ChunkKey, ChunkKeyEncoding, Compression, DataType, DatasetIdentity,
    Element, Endian, FillValue, MemoryOrder,
};
pub use view::ArrayView;
