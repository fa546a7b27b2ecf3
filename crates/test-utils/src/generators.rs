//! Synthetic volume generators.
//!
//! Generators are pure functions of the global voxel coordinate, so a test
//! can write a dataset with one and verify any region read against the same
//! function.

/// Deterministic, position-dependent `u16` value.
///
/// Neighbouring voxels along every axis differ, which catches transposed
/// axes and off-by-one offsets in region assembly.
///
/// ```
/// use test_utils::pattern_u16;
///
/// assert_eq!(pattern_u16(&[0, 0, 0]), 0);
/// assert_ne!(pattern_u16(&[1, 0, 0]), pattern_u16(&[0, 1, 0]));
/// ```
pub fn pattern_u16(coord: &[u64]) -> u16 {
    const WEIGHTS: [u64; 5] = [1, 251, 8191, 131, 17];
    let sum: u64 = coord
        .iter()
        .zip(WEIGHTS.iter().cycle())
        .map(|(c, w)| c * w)
        .sum();
    (sum % 65_521) as u16
}

/// A volume that is zero everywhere except at the given points.
///
/// Mirrors sparse datasets where most blocks are never written.
pub fn sparse_points<I, C>(points: I) -> impl Fn(&[u64]) -> u16 + Send + Sync + 'static
where
    I: IntoIterator<Item = (C, u16)>,
    C: AsRef<[u64]>,
{
    let points: Vec<(Vec<u64>, u16)> = points
        .into_iter()
        .map(|(coord, value)| (coord.as_ref().to_vec(), value))
        .collect();
    move |coord| {
        points
            .iter()
            .find(|(p, _)| p.as_slice() == coord)
            .map(|&(_, v)| v)
            .unwrap_or(0)
    }
}

/// Every coordinate of a region of `size`, in row-major order (last axis
/// fastest), starting at the origin.
pub fn region_coords(size: &[u64]) -> Vec<Vec<u64>> {
    let total: u64 = size.iter().product();
    let mut out = Vec::with_capacity(total as usize);
    if total == 0 {
        return out;
    }

    let mut pos = vec![0u64; size.len()];
    loop {
        out.push(pos.clone());
        let mut axis = size.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            pos[axis] += 1;
            if pos[axis] < size[axis] {
                break;
            }
            pos[axis] = 0;
        }
    }
}

/// Number of blocks along each axis.
pub fn blocks_per_axis(dimensions: &[u64], block_size: &[u64]) -> Vec<u64> {
    dimensions
        .iter()
        .zip(block_size)
        .map(|(d, b)| d.div_ceil(*b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_deterministic_and_varies() {
        assert_eq!(pattern_u16(&[5, 6, 7]), pattern_u16(&[5, 6, 7]));
        assert_ne!(pattern_u16(&[5, 6, 7]), pattern_u16(&[5, 6, 8]));
        assert_ne!(pattern_u16(&[5, 6, 7]), pattern_u16(&[6, 5, 7]));
    }

    #[test]
    fn test_sparse_points() {
        let volume = sparse_points([([1u64, 2], 170), ([3, 4], 9)]);
        assert_eq!(volume(&[1, 2]), 170);
        assert_eq!(volume(&[3, 4]), 9);
        assert_eq!(volume(&[0, 0]), 0);
    }

    #[test]
    fn test_region_coords_order() {
        let coords = region_coords(&[2, 3]);
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], vec![0, 0]);
        assert_eq!(coords[1], vec![0, 1]);
        assert_eq!(coords[3], vec![1, 0]);
        assert!(region_coords(&[2, 0]).is_empty());
    }

    #[test]
    fn test_blocks_per_axis() {
        assert_eq!(blocks_per_axis(&[483, 393, 603], &[64, 64, 64]), vec![8, 7, 10]);
    }
}
