//! Typed, shaped byte buffers for decoded chunks and assembled regions.

use crate::error::{Result, VolumeError};
use crate::layout;
use crate::types::{DataType, Element, FillValue, MemoryOrder};

/// Dense N-dimensional buffer of native-endian elements.
///
/// Decoded chunks are shared behind an `Arc` and never mutated, so readers
/// only ever see a consistent snapshot of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBuffer {
    data: Vec<u8>,
    shape: Vec<u64>,
    data_type: DataType,
    order: MemoryOrder,
}

/// A decoded chunk, always the full nominal chunk shape.
pub type DecodedChunk = ArrayBuffer;

/// The result of a region read, shaped like the requested region.
pub type RegionBuffer = ArrayBuffer;

impl ArrayBuffer {
    /// Wrap native-endian bytes. Fails if the length does not match the shape.
    pub fn from_bytes(
        data: Vec<u8>,
        shape: Vec<u64>,
        data_type: DataType,
        order: MemoryOrder,
    ) -> Result<Self> {
        let expected = shape.iter().product::<u64>() as usize * data_type.size();
        if data.len() != expected {
            return Err(VolumeError::corrupt_chunk(format!(
                "buffer holds {} bytes, shape {:?} of {} needs {}",
                data.len(),
                shape,
                data_type,
                expected
            )));
        }
        Ok(Self {
            data,
            shape,
            data_type,
            order,
        })
    }

    /// A buffer of `shape` with every element set to `fill_value`.
    pub fn filled(shape: Vec<u64>, data_type: DataType, order: MemoryOrder, fill_value: impl Into<FillValue>) -> Self {
        let count = shape.iter().product::<u64>() as usize;
        let data = data_type.scalar_bytes(fill_value).repeat(count);
        Self {
            data,
            shape,
            data_type,
            order,
        }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn order(&self) -> MemoryOrder {
        self.order
    }

    /// Raw native-endian bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.len() / self.data_type.size()
    }

    /// Memory held by this buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Element at a buffer-local coordinate.
    pub fn get<T: Element>(&self, coord: &[u64]) -> Result<T> {
        self.check_type::<T>()?;
        if coord.len() != self.shape.len() || coord.iter().zip(&self.shape).any(|(c, s)| c >= s) {
            return Err(VolumeError::invalid_region(format!(
                "coordinate {:?} outside buffer of shape {:?}",
                coord, self.shape
            )));
        }
        let size = self.data_type.size();
        let idx = layout::linear_index(coord, &self.shape, self.order) as usize * size;
        Ok(bytemuck::pod_read_unaligned(&self.data[idx..idx + size]))
    }

    /// All elements, in the buffer's memory order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        Ok(self
            .data
            .chunks_exact(self.data_type.size())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::DATA_TYPE != self.data_type {
            return Err(VolumeError::TypeMismatch {
                actual: self.data_type,
                requested: T::DATA_TYPE,
            });
        }
        Ok(())
    }
}
