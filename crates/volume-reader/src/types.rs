//! Core types shared by the grid, decoder, cache and views.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Value of array positions not backed by a stored chunk.
///
/// Integer fill values are kept as integers so 64-bit values above 2^53
/// survive unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    UInt(u64),
    Int(i64),
    Float(f64),
}

impl FillValue {
    pub fn as_u64(&self) -> u64 {
        match *self {
            Self::UInt(v) => v,
            Self::Int(v) => v as u64,
            Self::Float(v) => v as u64,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::UInt(v) => v as i64,
            Self::Int(v) => v,
            Self::Float(v) => v as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::UInt(v) => v as f64,
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float(v) if v.is_nan())
    }
}

impl Default for FillValue {
    fn default() -> Self {
        Self::UInt(0)
    }
}

impl From<f64> for FillValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<u64> for FillValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<i64> for FillValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Parse an N5 `dataType` attribute (e.g. "uint16").
    pub fn from_n5(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "uint8" => Some(Self::UInt8),
            "uint16" => Some(Self::UInt16),
            "uint32" => Some(Self::UInt32),
            "uint64" => Some(Self::UInt64),
            "int8" => Some(Self::Int8),
            "int16" => Some(Self::Int16),
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    /// Parse a Zarr v2 `dtype` string (e.g. "<u2", ">f4", "|u1").
    pub fn from_zarr(s: &str) -> Option<(Self, Endian)> {
        let mut chars = s.chars();
        let endian = match chars.next()? {
            '<' | '|' => Endian::Little,
            '>' => Endian::Big,
            _ => return None,
        };
        let data_type = match chars.as_str() {
            "u1" => Self::UInt8,
            "u2" => Self::UInt16,
            "u4" => Self::UInt32,
            "u8" => Self::UInt64,
            "i1" => Self::Int8,
            "i2" => Self::Int16,
            "i4" => Self::Int32,
            "i8" => Self::Int64,
            "f4" => Self::Float32,
            "f8" => Self::Float64,
            _ => return None,
        };
        Some((data_type, endian))
    }

    /// Native-endian bytes of `value` converted to this type.
    ///
    /// Used to materialize fill values.
    pub fn scalar_bytes(&self, value: impl Into<FillValue>) -> Vec<u8> {
        let value = value.into();
        match self {
            Self::UInt8 => (value.as_u64() as u8).to_ne_bytes().to_vec(),
            Self::UInt16 => (value.as_u64() as u16).to_ne_bytes().to_vec(),
            Self::UInt32 => (value.as_u64() as u32).to_ne_bytes().to_vec(),
            Self::UInt64 => value.as_u64().to_ne_bytes().to_vec(),
            Self::Int8 => (value.as_i64() as i8).to_ne_bytes().to_vec(),
            Self::Int16 => (value.as_i64() as i16).to_ne_bytes().to_vec(),
            Self::Int32 => (value.as_i64() as i32).to_ne_bytes().to_vec(),
            Self::Int64 => value.as_i64().to_ne_bytes().to_vec(),
            Self::Float32 => (value.as_f64() as f32).to_ne_bytes().to_vec(),
            Self::Float64 => value.as_f64().to_ne_bytes().to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rust primitive that can be read out of an array buffer.
pub trait Element: bytemuck::Pod {
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DATA_TYPE: DataType = DataType::$dt;
            }
        )*
    };
}

impl_element!(
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
);

/// Byte order of stored elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running platform.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }
}

/// Memory order of elements inside a chunk or region buffer.
///
/// `C` is row-major (last axis fastest, Zarr default); `F` is column-major
/// (first axis fastest, as N5 stores blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryOrder {
    #[default]
    C,
    F,
}

impl MemoryOrder {
    /// Index of the axis whose elements are contiguous in memory.
    pub fn fastest_axis(&self, ndim: usize) -> usize {
        match self {
            Self::C => ndim.saturating_sub(1),
            Self::F => 0,
        }
    }
}

/// Compression applied to stored chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Raw,
    Gzip,
    Zlib,
}

impl Compression {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "raw" | "none" => Some(Self::Raw),
            "gzip" => Some(Self::Gzip),
            "zlib" => Some(Self::Zlib),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk framing of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// N5 block: big-endian header with the stored block shape, then payload.
    /// Boundary blocks are stored truncated to the array extent.
    N5,
    /// Zarr v2 chunk: payload only, always the full chunk shape.
    Zarr,
}

/// Mapping from a chunk index to its storage key below the array path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKeyEncoding {
    /// `x/y/z`, one directory level per axis.
    N5,
    /// `0.1.2`
    ZarrDot,
    /// `0/1/2`
    ZarrSlash,
}

impl ChunkKeyEncoding {
    /// Encode a chunk index as a storage key under `array_path`.
    pub fn encode(&self, array_path: &str, index: &[u64]) -> String {
        let separator = match self {
            Self::N5 | Self::ZarrSlash => "/",
            Self::ZarrDot => ".",
        };
        let key = index
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(separator);

        let prefix = array_path.trim_matches('/');
        if prefix.is_empty() {
            key
        } else {
            format!("{}/{}", prefix, key)
        }
    }
}

/// Identifies the physical array a chunk belongs to.
///
/// Two views over the same backend location and array path share an
/// identity, and therefore share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetIdentity(Arc<str>);

impl DatasetIdentity {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key for a decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub dataset: DatasetIdentity,
    pub level: u32,
    pub index: Vec<u64>,
}

impl ChunkKey {
    pub fn new(dataset: DatasetIdentity, level: u32, index: Vec<u64>) -> Self {
        Self {
            dataset,
            level,
            index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@s{}[", self.dataset, self.level)?;
        for (i, idx) in self.index.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", idx)?;
        }
        f.write_str("]")
    }
}

/// Statistics about the chunk cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined a fetch already in flight.
    pub coalesced: u64,
    pub evictions: u64,
    pub failures: u64,
    pub entries: usize,
    pub pending: usize,
    pub memory_bytes: u64,
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    ///
    /// Coalesced waits count as hits: they did not trigger a fetch.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
