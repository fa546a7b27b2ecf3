//! Chunk decoding.
//!
//! Turns stored chunk bytes into a [`DecodedChunk`] of the full nominal chunk
//! shape, or produces a fill-value chunk for chunks the backend does not hold.
//! Everything here is a pure function of its inputs and safe to run on any
//! thread.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::buffer::{ArrayBuffer, DecodedChunk};
use crate::error::{Result, VolumeError};
use crate::layout::{self, BlockRef};
use crate::metadata::ArrayMetadata;
use crate::types::{ChunkFormat, Compression, Endian};

/// N5 block mode for plain element data.
const N5_MODE_DEFAULT: u16 = 0;
/// N5 block mode with an explicit element count after the shape.
const N5_MODE_VARLEN: u16 = 1;

/// Decode stored chunk bytes.
///
/// Fails with `CorruptChunk` when the decompressed payload does not hold
/// exactly `product(stored shape) * element size` bytes.
pub fn decode_chunk(raw: &[u8], meta: &ArrayMetadata) -> Result<DecodedChunk> {
    let (stored_shape, payload) = match meta.format {
        ChunkFormat::N5 => split_n5_block(raw, meta)?,
        ChunkFormat::Zarr => (meta.chunk_shape.clone(), raw),
    };

    let elem = meta.data_type.size();
    let expected = stored_shape.iter().product::<u64>() as usize * elem;
    let mut bytes = decompress(payload, meta.compression, expected)?.into_owned();

    if bytes.len() != expected {
        return Err(VolumeError::corrupt_chunk(format!(
            "decompressed {} bytes, stored shape {:?} of {} needs {}",
            bytes.len(),
            stored_shape,
            meta.data_type,
            expected
        )));
    }

    if meta.byte_order != Endian::native() && elem > 1 {
        for element in bytes.chunks_exact_mut(elem) {
            element.reverse();
        }
    }

    if stored_shape == meta.chunk_shape {
        return ArrayBuffer::from_bytes(bytes, stored_shape, meta.data_type, meta.order);
    }

    // Truncated boundary block: pad out to the nominal chunk shape.
    let mut chunk = fill_chunk(meta);
    let origin = vec![0u64; stored_shape.len()];
    layout::copy_block(
        BlockRef {
            data: &bytes,
            shape: &stored_shape,
            offset: &origin,
        },
        BlockRef {
            data: chunk.as_bytes_mut(),
            shape: &meta.chunk_shape,
            offset: &origin,
        },
        &stored_shape,
        meta.order,
        elem,
    );
    Ok(chunk)
}

/// A chunk of the nominal chunk shape holding only the fill value.
pub fn fill_chunk(meta: &ArrayMetadata) -> DecodedChunk {
    ArrayBuffer::filled(
        meta.chunk_shape.clone(),
        meta.data_type,
        meta.order,
        meta.fill_value,
    )
}

/// Split an N5 block into its stored shape and compressed payload.
fn split_n5_block<'a>(raw: &'a [u8], meta: &ArrayMetadata) -> Result<(Vec<u64>, &'a [u8])> {
    let mut cursor = Cursor::new(raw);

    let mode = cursor.read_u16()?;
    let ndim = cursor.read_u16()? as usize;
    if ndim != meta.ndim() {
        return Err(VolumeError::corrupt_chunk(format!(
            "N5 block has {} dimensions, array has {}",
            ndim,
            meta.ndim()
        )));
    }

    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(cursor.read_u32()? as u64);
    }

    match mode {
        N5_MODE_DEFAULT => {}
        N5_MODE_VARLEN => {
            // Element count is implied by the shape for numeric data.
            cursor.read_u32()?;
        }
        other => {
            return Err(VolumeError::corrupt_chunk(format!(
                "unsupported N5 block mode {}",
                other
            )))
        }
    }

    if shape.iter().zip(&meta.chunk_shape).any(|(s, c)| s > c) {
        return Err(VolumeError::corrupt_chunk(format!(
            "N5 block shape {:?} exceeds chunk shape {:?}",
            shape, meta.chunk_shape
        )));
    }

    Ok((shape, cursor.rest()))
}

/// Inflate at most one byte past `expected`, so an oversized stream is
/// rejected by the length check without being fully inflated.
fn decompress(payload: &[u8], compression: Compression, expected: usize) -> Result<Cow<'_, [u8]>> {
    let limit = expected as u64 + 1;
    let mut out = Vec::with_capacity(expected);
    let res = match compression {
        Compression::Raw => return Ok(Cow::Borrowed(payload)),
        Compression::Gzip => GzDecoder::new(payload).take(limit).read_to_end(&mut out),
        Compression::Zlib => ZlibDecoder::new(payload).take(limit).read_to_end(&mut out),
    };
    res.map_err(|e| VolumeError::corrupt_chunk(format!("{} decompression failed: {}", compression, e)))?;
    Ok(Cow::Owned(out))
}

/// Big-endian reader over the N5 header.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| {
            VolumeError::corrupt_chunk(format!(
                "N5 header truncated at byte {} of {}",
                self.offset,
                self.bytes.len()
            ))
        })?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.take::<2>().map(u16::from_be_bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_be_bytes)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }
}
