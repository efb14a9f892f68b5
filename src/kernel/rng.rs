//! Per-path random number streams.
//!
//! Every number is a hash of `(rng_hash, sample, dimension)`. `rng_hash`
//! depends only on the pixel and the seed, so a given (pixel, sample) pair
//! always sees the same stream, whichever device renders it.

use rng_hash::{hash_uint2, hash_uint3_to_float};

use super::state::PathData;

/// Dimensions consumed once per camera sample.
pub const PRNG_FILTER_U: u32 = 0;
pub const PRNG_FILTER_V: u32 = 1;
pub const PRNG_LENS_U: u32 = 2;
pub const PRNG_LENS_V: u32 = 3;
pub const PRNG_TIME: u32 = 4;
pub const PRNG_BASE_NUM: u32 = 8;

/// Dimensions consumed per bounce, relative to `rng_offset`.
pub const PRNG_BSDF_U: u32 = 0;
pub const PRNG_BSDF_V: u32 = 1;
pub const PRNG_BSDF_PICK: u32 = 2;
pub const PRNG_LIGHT_U: u32 = 3;
pub const PRNG_LIGHT_V: u32 = 4;
pub const PRNG_LIGHT_PICK: u32 = 5;
pub const PRNG_LIGHT_TERMINATE: u32 = 6;
pub const PRNG_TERMINATE: u32 = 7;
pub const PRNG_SCATTER_DISTANCE: u32 = 8;
pub const PRNG_PHASE_U: u32 = 9;
pub const PRNG_PHASE_V: u32 = 10;
pub const PRNG_SUBSURFACE_U: u32 = 11;
pub const PRNG_SUBSURFACE_V: u32 = 12;
pub const PRNG_BOUNCE_NUM: u32 = 13;

/// Hash identifying the random stream of a pixel.
#[inline]
pub fn path_rng_hash(x: u32, y: u32, seed: u32) -> u32 {
    hash_uint2(x, y) ^ seed
}

/// Uniform float in `[0, 1)` for an absolute dimension.
#[inline]
pub fn path_rng_1d(rng_hash: u32, sample: u32, dimension: u32) -> f32 {
    hash_uint3_to_float(rng_hash, sample, dimension)
}

/// Two decorrelated uniform floats for an absolute dimension pair.
#[inline]
pub fn path_rng_2d(rng_hash: u32, sample: u32, dimension: u32) -> (f32, f32) {
    (
        path_rng_1d(rng_hash, sample, dimension),
        path_rng_1d(rng_hash, sample, dimension + 1),
    )
}

/// Random number for a per-bounce dimension of the current path.
#[inline]
pub fn path_state_rng_1d(path: &PathData, dimension: u32) -> f32 {
    path_rng_1d(path.rng_hash, path.sample as u32, path.rng_offset + dimension)
}

/// Random pair for a per-bounce dimension of the current path.
#[inline]
pub fn path_state_rng_2d(path: &PathData, dimension: u32) -> (f32, f32) {
    path_rng_2d(path.rng_hash, path.sample as u32, path.rng_offset + dimension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_pixel_sample_same_stream() {
        let a = path_rng_hash(12, 34, 0);
        let b = path_rng_hash(12, 34, 0);
        assert_eq!(a, b);
        for dim in 0..32 {
            assert_eq!(path_rng_1d(a, 5, dim), path_rng_1d(b, 5, dim));
        }
    }

    #[test]
    fn test_seed_changes_stream() {
        let a = path_rng_hash(12, 34, 0);
        let b = path_rng_hash(12, 34, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bounce_offset_advances_dimension() {
        let mut path = PathData {
            rng_hash: path_rng_hash(1, 1, 0),
            rng_offset: PRNG_BASE_NUM,
            sample: 3,
            ..Default::default()
        };
        let first = path_state_rng_1d(&path, PRNG_BSDF_U);
        path.rng_offset += PRNG_BOUNCE_NUM;
        let second = path_state_rng_1d(&path, PRNG_BSDF_U);
        assert_ne!(first, second);
    }
}
