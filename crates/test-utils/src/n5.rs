//! N5 block encoding and dataset writers.
//!
//! Blocks follow the N5 default block layout: a big-endian header (mode,
//! number of dimensions, stored extent per dimension) followed by the
//! compressed big-endian elements, first dimension fastest. Blocks on the
//! upper boundary of a dataset are stored truncated to the valid extent.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use flate2::write::GzEncoder;

use crate::generators::blocks_per_axis;

/// Compression of block payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompression {
    Raw,
    Gzip,
}

impl BlockCompression {
    fn attribute(&self) -> serde_json::Value {
        match self {
            Self::Raw => serde_json::json!({ "type": "raw" }),
            Self::Gzip => serde_json::json!({ "type": "gzip", "level": -1, "useZlib": false }),
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Raw => Ok(data.to_vec()),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }
}

/// Encode one N5 block from big-endian element bytes.
pub fn encode_n5_block(
    block_shape: &[u64],
    elements_be: &[u8],
    compression: BlockCompression,
) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(4 + 4 * block_shape.len() + elements_be.len());
    block.extend_from_slice(&0u16.to_be_bytes());
    block.extend_from_slice(&(block_shape.len() as u16).to_be_bytes());
    for &extent in block_shape {
        block.extend_from_slice(&u32::try_from(extent)?.to_be_bytes());
    }
    block.extend(compression.compress(elements_be)?);
    Ok(block)
}

/// Writes `uint16` N5 datasets whose values come from a generator.
#[derive(Debug, Clone)]
pub struct N5DatasetWriter {
    dimensions: Vec<u64>,
    block_size: Vec<u64>,
    compression: BlockCompression,
    skip_empty: bool,
}

impl N5DatasetWriter {
    pub fn new(dimensions: &[u64], block_size: &[u64]) -> Self {
        Self {
            dimensions: dimensions.to_vec(),
            block_size: block_size.to_vec(),
            compression: BlockCompression::Gzip,
            skip_empty: false,
        }
    }

    pub fn compression(mut self, compression: BlockCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Do not store blocks whose elements are all zero, like sparse writers.
    pub fn skip_empty_blocks(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    /// The dataset's `attributes.json`.
    pub fn attributes_json(&self) -> String {
        serde_json::json!({
            "dimensions": self.dimensions,
            "blockSize": self.block_size,
            "dataType": "uint16",
            "compression": self.compression.attribute(),
        })
        .to_string()
    }

    /// Valid extent of the block at `index`.
    pub fn block_shape(&self, index: &[u64]) -> Vec<u64> {
        index
            .iter()
            .zip(&self.block_size)
            .zip(&self.dimensions)
            .map(|((&i, &b), &d)| b.min(d.saturating_sub(i * b)))
            .collect()
    }

    /// Storage key of the block at `index`, relative to the dataset.
    pub fn block_key(index: &[u64]) -> String {
        index
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Encode the block at `index`.
    ///
    /// Returns `None` for all-zero blocks when empty blocks are skipped.
    pub fn block(&self, index: &[u64], value: impl Fn(&[u64]) -> u16) -> Result<Option<Vec<u8>>> {
        ensure!(
            index.len() == self.dimensions.len(),
            "block index {:?} does not match {} dimensions",
            index,
            self.dimensions.len()
        );
        let shape = self.block_shape(index);
        ensure!(shape.iter().all(|&e| e > 0), "block {:?} outside dataset", index);

        let origin: Vec<u64> = index.iter().zip(&self.block_size).map(|(i, b)| i * b).collect();
        let mut elements = Vec::with_capacity(shape.iter().product::<u64>() as usize * 2);
        let mut any_set = false;

        // First dimension fastest.
        let mut local = vec![0u64; shape.len()];
        let mut global = origin.clone();
        'outer: loop {
            for (axis, g) in global.iter_mut().enumerate() {
                *g = origin[axis] + local[axis];
            }
            let v = value(&global);
            any_set |= v != 0;
            elements.extend_from_slice(&v.to_be_bytes());

            for axis in 0..shape.len() {
                local[axis] += 1;
                if local[axis] < shape[axis] {
                    continue 'outer;
                }
                local[axis] = 0;
            }
            break;
        }

        if self.skip_empty && !any_set {
            return Ok(None);
        }
        encode_n5_block(&shape, &elements, self.compression).map(Some)
    }

    /// Write the attributes and the given blocks below `dir`.
    ///
    /// Returns the number of blocks written.
    pub fn write_blocks<I>(&self, dir: &Path, indices: I, value: impl Fn(&[u64]) -> u16) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<u64>>,
    {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        fs::write(dir.join("attributes.json"), self.attributes_json())?;

        let mut written = 0;
        for index in indices {
            let Some(block) = self.block(&index, &value)? else {
                continue;
            };
            let path = dir.join(Self::block_key(&index));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, block).with_context(|| format!("writing {}", path.display()))?;
            written += 1;
        }
        Ok(written)
    }

    /// Write the attributes and every block of the dataset below `dir`.
    pub fn write(&self, dir: &Path, value: impl Fn(&[u64]) -> u16) -> Result<usize> {
        let grid = blocks_per_axis(&self.dimensions, &self.block_size);
        let indices = crate::generators::region_coords(&grid);
        self.write_blocks(dir, indices, value)
    }
}
