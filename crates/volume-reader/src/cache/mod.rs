//! Decoded-chunk cache shared by every view of a dataset session.

mod chunk_cache;

pub use chunk_cache::{ChunkCache, ChunkRef};
