//! Chunk grid arithmetic.
//!
//! Maps logical array coordinates to chunk indices and chunk-local offsets.
//! Pure arithmetic: no I/O and no state beyond the two shapes.

use crate::error::{Result, VolumeError};

/// Regular chunk grid over an N-dimensional array.
///
/// The chunk shape does not need to divide the array shape: the last chunk
/// along an axis is a boundary chunk whose valid extent is smaller than the
/// nominal chunk extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
}

/// The part of one chunk that a requested region covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIntersection {
    /// Position of the chunk in the chunk grid.
    pub index: Vec<u64>,
    /// Start of the covered box in chunk-local coordinates.
    pub chunk_offset: Vec<u64>,
    /// Start of the covered box in region-local coordinates.
    pub region_offset: Vec<u64>,
    /// Extent of the covered box.
    pub extent: Vec<u64>,
}

impl ChunkIntersection {
    /// Number of elements in the covered box.
    pub fn num_elements(&self) -> u64 {
        self.extent.iter().product()
    }
}

impl ChunkGrid {
    /// Create a grid, rejecting mismatched ranks and empty axes.
    pub fn new(shape: Vec<u64>, chunk_shape: Vec<u64>) -> Result<Self> {
        if shape.is_empty() || shape.len() != chunk_shape.len() {
            return Err(VolumeError::invalid_metadata(format!(
                "shape {:?} and chunk shape {:?} must have the same non-zero rank",
                shape, chunk_shape
            )));
        }
        if shape.iter().chain(&chunk_shape).any(|&e| e == 0) {
            return Err(VolumeError::invalid_metadata(format!(
                "shape {:?} and chunk shape {:?} must be positive",
                shape, chunk_shape
            )));
        }
        Ok(Self { shape, chunk_shape })
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// Number of chunks along each axis: `ceil(shape / chunk_shape)`.
    pub fn num_chunks(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&s, &c)| s.div_ceil(c))
            .collect()
    }

    /// Total number of chunks in the grid.
    pub fn total_chunks(&self) -> u64 {
        self.num_chunks().iter().product()
    }

    /// Whether `index` addresses a chunk of this grid.
    pub fn contains_index(&self, index: &[u64]) -> bool {
        index.len() == self.ndim()
            && index
                .iter()
                .zip(self.num_chunks())
                .all(|(&i, n)| i < n)
    }

    /// Logical coordinate of the first element of a chunk.
    pub fn chunk_origin(&self, index: &[u64]) -> Vec<u64> {
        index
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&i, &c)| i * c)
            .collect()
    }

    /// Extent of a chunk that lies inside the array.
    ///
    /// Equal to the chunk shape except for boundary chunks.
    pub fn chunk_valid_shape(&self, index: &[u64]) -> Vec<u64> {
        index
            .iter()
            .zip(&self.chunk_shape)
            .zip(&self.shape)
            .map(|((&i, &c), &s)| c.min(s.saturating_sub(i * c)))
            .collect()
    }

    /// Chunk index and chunk-local offset of a single coordinate.
    pub fn chunk_index_of(&self, coord: &[u64]) -> Result<(Vec<u64>, Vec<u64>)> {
        self.validate_region(coord, &vec![1; coord.len()])?;
        let index = coord
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&x, &c)| x / c)
            .collect();
        let local = coord
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&x, &c)| x % c)
            .collect();
        Ok((index, local))
    }

    /// Check that `offset`/`size` describe a non-empty region inside the array.
    pub fn validate_region(&self, offset: &[u64], size: &[u64]) -> Result<()> {
        if offset.len() != self.ndim() || size.len() != self.ndim() {
            return Err(VolumeError::invalid_region(format!(
                "region rank {}/{} does not match array rank {}",
                offset.len(),
                size.len(),
                self.ndim()
            )));
        }
        for axis in 0..self.ndim() {
            if size[axis] == 0 {
                return Err(VolumeError::invalid_region(format!(
                    "size along axis {} is zero",
                    axis
                )));
            }
            let end = offset[axis].checked_add(size[axis]);
            if end.map_or(true, |end| end > self.shape[axis]) {
                return Err(VolumeError::invalid_region(format!(
                    "region {:?}+{:?} exceeds shape {:?} along axis {}",
                    offset, size, self.shape, axis
                )));
            }
        }
        Ok(())
    }

    /// Chunks intersecting the region, in row-major order (last axis fastest).
    ///
    /// The returned boxes tile the region exactly: every region element is
    /// covered by one intersection.
    pub fn intersections(&self, offset: &[u64], size: &[u64]) -> Result<Vec<ChunkIntersection>> {
        self.validate_region(offset, size)?;

        // Per axis: (chunk index, chunk-local start, region-local start, extent).
        let per_axis: Vec<Vec<(u64, u64, u64, u64)>> = (0..self.ndim())
            .map(|axis| {
                let c = self.chunk_shape[axis];
                let start = offset[axis];
                let end = offset[axis] + size[axis];
                let first = start / c;
                let last = (end - 1) / c;
                (first..=last)
                    .map(|chunk| {
                        let chunk_start = chunk * c;
                        let lo = start.max(chunk_start);
                        let hi = end.min(chunk_start + c);
                        (chunk, lo - chunk_start, lo - start, hi - lo)
                    })
                    .collect()
            })
            .collect();

        let total: usize = per_axis.iter().map(Vec::len).product();
        let mut out = Vec::with_capacity(total);
        let mut pos = vec![0usize; self.ndim()];

        loop {
            let mut ix = ChunkIntersection {
                index: Vec::with_capacity(self.ndim()),
                chunk_offset: Vec::with_capacity(self.ndim()),
                region_offset: Vec::with_capacity(self.ndim()),
                extent: Vec::with_capacity(self.ndim()),
            };
            for (axis, &p) in pos.iter().enumerate() {
                let (chunk, chunk_off, region_off, extent) = per_axis[axis][p];
                ix.index.push(chunk);
                ix.chunk_offset.push(chunk_off);
                ix.region_offset.push(region_off);
                ix.extent.push(extent);
            }
            out.push(ix);

            // Advance the odometer, last axis fastest.
            let mut axis = self.ndim();
            loop {
                if axis == 0 {
                    return Ok(out);
                }
                axis -= 1;
                pos[axis] += 1;
                if pos[axis] < per_axis[axis].len() {
                    break;
                }
                pos[axis] = 0;
            }
        }
    }
}
