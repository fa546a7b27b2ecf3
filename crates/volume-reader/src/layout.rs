//! Strided copies between N-dimensional byte buffers.

use crate::types::MemoryOrder;

/// Element strides of a dense buffer of `shape` laid out in `order`.
pub(crate) fn strides(shape: &[u64], order: MemoryOrder) -> Vec<u64> {
    let mut strides = vec![0u64; shape.len()];
    let mut acc = 1u64;
    match order {
        MemoryOrder::C => {
            for axis in (0..shape.len()).rev() {
                strides[axis] = acc;
                acc *= shape[axis];
            }
        }
        MemoryOrder::F => {
            for axis in 0..shape.len() {
                strides[axis] = acc;
                acc *= shape[axis];
            }
        }
    }
    strides
}

/// Linear element index of `coord` in a buffer of `shape`.
pub(crate) fn linear_index(coord: &[u64], shape: &[u64], order: MemoryOrder) -> u64 {
    strides(shape, order)
        .iter()
        .zip(coord)
        .map(|(stride, c)| stride * c)
        .sum()
}

/// A dense buffer plus the offset of the box being copied within it.
pub(crate) struct BlockRef<'a, T> {
    pub data: T,
    pub shape: &'a [u64],
    pub offset: &'a [u64],
}

/// Copy a box of `extent` elements from `src` to `dst`.
///
/// Both buffers share `order` and element size `elem`. The copy runs as one
/// `copy_from_slice` per contiguous line along the fastest axis.
pub(crate) fn copy_block(
    src: BlockRef<'_, &[u8]>,
    dst: BlockRef<'_, &mut [u8]>,
    extent: &[u64],
    order: MemoryOrder,
    elem: usize,
) {
    let ndim = extent.len();
    if ndim == 0 || extent.iter().any(|&e| e == 0) {
        return;
    }

    let src_strides = strides(src.shape, order);
    let dst_strides = strides(dst.shape, order);
    let fastest = order.fastest_axis(ndim);
    let run_bytes = extent[fastest] as usize * elem;

    // Odometer over every axis except the fastest.
    let mut pos = vec![0u64; ndim];
    loop {
        let mut src_idx = 0u64;
        let mut dst_idx = 0u64;
        for axis in 0..ndim {
            src_idx += (src.offset[axis] + pos[axis]) * src_strides[axis];
            dst_idx += (dst.offset[axis] + pos[axis]) * dst_strides[axis];
        }
        let s = src_idx as usize * elem;
        let d = dst_idx as usize * elem;
        dst.data[d..d + run_bytes].copy_from_slice(&src.data[s..s + run_bytes]);

        let mut advanced = false;
        for axis in outer_axes(ndim, order) {
            if axis == fastest {
                continue;
            }
            pos[axis] += 1;
            if pos[axis] < extent[axis] {
                advanced = true;
                break;
            }
            pos[axis] = 0;
        }
        if !advanced {
            break;
        }
    }
}

/// Axes from fastest-varying to slowest for the given order.
fn outer_axes(ndim: usize, order: MemoryOrder) -> Box<dyn Iterator<Item = usize>> {
    match order {
        MemoryOrder::C => Box::new((0..ndim).rev()),
        MemoryOrder::F => Box::new(0..ndim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides() {
        assert_eq!(strides(&[2, 3, 4], MemoryOrder::C), vec![12, 4, 1]);
        assert_eq!(strides(&[2, 3, 4], MemoryOrder::F), vec![1, 2, 6]);
    }

    #[test]
    fn test_linear_index() {
        assert_eq!(linear_index(&[1, 2, 3], &[2, 3, 4], MemoryOrder::C), 12 + 8 + 3);
        assert_eq!(linear_index(&[1, 2, 3], &[2, 3, 4], MemoryOrder::F), 1 + 4 + 18);
    }

    #[test]
    fn test_copy_block_c_order() {
        // 3x4 source, values 0..12, copy the 2x2 box at (1, 1) into a 2x3 destination at (0, 1).
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 6];

        copy_block(
            BlockRef { data: &src, shape: &[3, 4], offset: &[1, 1] },
            BlockRef { data: &mut dst, shape: &[2, 3], offset: &[0, 1] },
            &[2, 2],
            MemoryOrder::C,
            1,
        );

        assert_eq!(dst, vec![0, 5, 6, 0, 9, 10]);
    }

    #[test]
    fn test_copy_block_f_order_multibyte() {
        // 2x2 u16 source in F order: (0,0)=1 (1,0)=2 (0,1)=3 (1,1)=4.
        let src: Vec<u8> = [1u16, 2, 3, 4].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let mut dst = vec![0u8; 3 * 3 * 2];

        copy_block(
            BlockRef { data: &src, shape: &[2, 2], offset: &[0, 0] },
            BlockRef { data: &mut dst, shape: &[3, 3], offset: &[1, 1] },
            &[2, 2],
            MemoryOrder::F,
            2,
        );

        let values: Vec<u16> = dst
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![0, 0, 0, 0, 1, 2, 0, 3, 4]);
    }
}
