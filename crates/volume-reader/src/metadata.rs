//! Per-array metadata consumed by the grid, decoder and views.
//!
//! Discovery (listing channels, timepoints and pyramid levels) happens
//! elsewhere. This module only describes one array and, for convenience,
//! parses the two JSON documents that carry such a description: the N5
//! `attributes.json` and the Zarr v2 `.zarray`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VolumeError};
use crate::types::{
    ChunkFormat, ChunkKeyEncoding, Compression, DataType, Endian, FillValue, MemoryOrder,
};

/// Layout and encoding of one chunked array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    /// Array extent per axis.
    pub shape: Vec<u64>,
    /// Nominal chunk extent per axis.
    pub chunk_shape: Vec<u64>,
    pub data_type: DataType,
    /// Byte order of stored elements.
    pub byte_order: Endian,
    /// Element order inside chunks (and inside region buffers).
    pub order: MemoryOrder,
    /// Value of positions not backed by a stored chunk.
    pub fill_value: FillValue,
    pub compression: Compression,
    pub format: ChunkFormat,
    pub key_encoding: ChunkKeyEncoding,
}

impl ArrayMetadata {
    /// Metadata for an N5 dataset with default (gzip) compression.
    pub fn n5(shape: Vec<u64>, chunk_shape: Vec<u64>, data_type: DataType) -> Self {
        Self {
            shape,
            chunk_shape,
            data_type,
            byte_order: Endian::Big,
            order: MemoryOrder::F,
            fill_value: FillValue::default(),
            compression: Compression::Gzip,
            format: ChunkFormat::N5,
            key_encoding: ChunkKeyEncoding::N5,
        }
    }

    /// Metadata for an uncompressed little-endian Zarr v2 array in C order.
    pub fn zarr(shape: Vec<u64>, chunk_shape: Vec<u64>, data_type: DataType) -> Self {
        Self {
            shape,
            chunk_shape,
            data_type,
            byte_order: Endian::Little,
            order: MemoryOrder::C,
            fill_value: FillValue::default(),
            compression: Compression::Raw,
            format: ChunkFormat::Zarr,
            key_encoding: ChunkKeyEncoding::ZarrDot,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_fill_value(mut self, fill_value: impl Into<FillValue>) -> Self {
        self.fill_value = fill_value.into();
        self
    }

    pub fn with_order(mut self, order: MemoryOrder) -> Self {
        self.order = order;
        self
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in one full chunk.
    pub fn chunk_num_elements(&self) -> u64 {
        self.chunk_shape.iter().product()
    }

    /// Size of one decoded chunk in bytes.
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_num_elements() as usize * self.data_type.size()
    }

    /// Check the invariants the grid and decoder rely on.
    pub fn validate(&self) -> Result<()> {
        if self.shape.is_empty() {
            return Err(VolumeError::invalid_metadata("array must have at least 1 dimension"));
        }
        if self.shape.len() != self.chunk_shape.len() {
            return Err(VolumeError::invalid_metadata(format!(
                "shape has {} dimensions but chunk shape has {}",
                self.shape.len(),
                self.chunk_shape.len()
            )));
        }
        if self.shape.iter().any(|&s| s == 0) {
            return Err(VolumeError::invalid_metadata(format!(
                "shape {:?} has an empty axis",
                self.shape
            )));
        }
        if self.chunk_shape.iter().any(|&c| c == 0) {
            return Err(VolumeError::invalid_metadata(format!(
                "chunk shape {:?} has an empty axis",
                self.chunk_shape
            )));
        }
        if self.format == ChunkFormat::N5 && self.byte_order != Endian::Big {
            return Err(VolumeError::invalid_metadata("N5 blocks are always big-endian"));
        }
        Ok(())
    }

    /// Parse an N5 dataset `attributes.json`.
    ///
    /// Both the current `compression` object and the legacy
    /// `compressionType` string are accepted.
    pub fn from_n5_attributes(json: &str) -> Result<Self> {
        let attrs: N5Attributes = serde_json::from_str(json)?;

        let data_type = DataType::from_n5(&attrs.data_type).ok_or_else(|| {
            VolumeError::invalid_metadata(format!("unsupported N5 dataType {}", attrs.data_type))
        })?;

        let compression_name = attrs
            .compression
            .as_ref()
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            .or(attrs.compression_type.as_deref())
            .unwrap_or("raw");
        let mut compression = Compression::from_str(compression_name).ok_or_else(|| {
            VolumeError::invalid_metadata(format!("unsupported N5 compression {}", compression_name))
        })?;
        // N5 gzip with useZlib stores bare zlib streams.
        let use_zlib = attrs
            .compression
            .as_ref()
            .and_then(|c| c.get("useZlib"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if compression == Compression::Gzip && use_zlib {
            compression = Compression::Zlib;
        }

        let metadata = Self::n5(attrs.dimensions, attrs.block_size, data_type)
            .with_compression(compression);
        metadata.validate()?;
        Ok(metadata)
    }

    /// Parse a Zarr v2 `.zarray` document.
    pub fn from_zarr_array(json: &str) -> Result<Self> {
        let zarray: ZarrArray = serde_json::from_str(json)?;

        if zarray.zarr_format != 2 {
            return Err(VolumeError::invalid_metadata(format!(
                "unsupported zarr_format {}",
                zarray.zarr_format
            )));
        }
        if zarray.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(VolumeError::invalid_metadata("zarr filters are not supported"));
        }

        let (data_type, byte_order) = DataType::from_zarr(&zarray.dtype).ok_or_else(|| {
            VolumeError::invalid_metadata(format!("unsupported zarr dtype {}", zarray.dtype))
        })?;

        let compression = match &zarray.compressor {
            None => Compression::Raw,
            Some(c) => {
                let id = c.get("id").and_then(Value::as_str).unwrap_or("");
                Compression::from_str(id).ok_or_else(|| {
                    VolumeError::invalid_metadata(format!("unsupported zarr compressor {}", id))
                })?
            }
        };

        let order = match zarray.order.as_str() {
            "C" => MemoryOrder::C,
            "F" => MemoryOrder::F,
            other => {
                return Err(VolumeError::invalid_metadata(format!(
                    "unknown zarr order {}",
                    other
                )))
            }
        };

        let key_encoding = match zarray.dimension_separator.as_deref() {
            None | Some(".") => ChunkKeyEncoding::ZarrDot,
            Some("/") => ChunkKeyEncoding::ZarrSlash,
            Some(other) => {
                return Err(VolumeError::invalid_metadata(format!(
                    "unknown dimension_separator {}",
                    other
                )))
            }
        };

        let fill_value = match &zarray.fill_value {
            Value::Number(n) => match (n.as_u64(), n.as_i64()) {
                (Some(v), _) => FillValue::UInt(v),
                (None, Some(v)) => FillValue::Int(v),
                _ => FillValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) if s == "NaN" => FillValue::Float(f64::NAN),
            Value::String(s) if s == "Infinity" => FillValue::Float(f64::INFINITY),
            Value::String(s) if s == "-Infinity" => FillValue::Float(f64::NEG_INFINITY),
            _ => FillValue::default(),
        };

        let metadata = Self {
            shape: zarray.shape,
            chunk_shape: zarray.chunks,
            data_type,
            byte_order,
            order,
            fill_value,
            compression,
            format: ChunkFormat::Zarr,
            key_encoding,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct N5Attributes {
    dimensions: Vec<u64>,
    block_size: Vec<u64>,
    data_type: String,
    #[serde(default)]
    compression: Option<Value>,
    #[serde(default)]
    compression_type: Option<String>,
}

#[derive(Deserialize)]
struct ZarrArray {
    zarr_format: u32,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: String,
    #[serde(default)]
    compressor: Option<Value>,
    #[serde(default)]
    fill_value: Value,
    #[serde(default = "default_order")]
    order: String,
    #[serde(default)]
    filters: Option<Vec<Value>>,
    #[serde(default)]
    dimension_separator: Option<String>,
}

fn default_order() -> String {
    "C".to_string()
}
