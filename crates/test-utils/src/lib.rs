//! Shared test utilities for the volume-reader workspace.
//!
//! This crate provides common testing infrastructure including:
//! - N5 block encoding and on-disk N5 dataset writers
//! - Synthetic volume generators with predictable values
//! - Fixtures describing real datasets and values known to be stored in them
//!
//! It deliberately does not depend on `volume-reader`, so that crate can use
//! it as a dev-dependency without a cycle.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, N5DatasetWriter};
//! ```

pub mod fixtures;
pub mod generators;
pub mod n5;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use n5::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that every voxel of a region equals the value a generator gives
/// for its global coordinate.
///
/// `$get` reads a region-local coordinate, `$expected` maps a global
/// coordinate to the value the volume should hold there.
///
/// ```ignore
/// assert_region_matches!(&[10, 20, 0], &[4, 4, 1], |local| region.get::<u16>(local).unwrap(), pattern_u16);
/// ```
#[macro_export]
macro_rules! assert_region_matches {
    ($offset:expr, $size:expr, $get:expr, $expected:expr) => {{
        let offset: &[u64] = $offset;
        let size: &[u64] = $size;
        for local in $crate::region_coords(size) {
            let global: Vec<u64> = local.iter().zip(offset).map(|(l, o)| l + o).collect();
            let got = ($get)(local.as_slice());
            let want = ($expected)(global.as_slice());
            assert_eq!(got, want, "mismatch at global coordinate {:?}", global);
        }
    }};
}
