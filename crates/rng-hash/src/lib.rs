//! Integer hash functions for deterministic sampling streams.
//!
//! Bob Jenkins' lookup3 final mix (`hash_uint*`) and the MurmurHash3 32-bit
//! finalizer (`fmix32`). All rights to the original algorithms belong to
//! their authors.
//!
//! The path tracer derives every random number from a hash of
//! `(pixel, sample, dimension)`, so the same inputs always produce the
//! same stream regardless of which thread or device evaluates the path.

/// lookup3 initial state for `n` 32-bit words.
#[inline]
const fn lookup3_init(n: u32) -> u32 {
    0xdead_beef_u32.wrapping_add(n << 2).wrapping_add(13)
}

/// lookup3 `final(a, b, c)` mix. Returns `c`.
#[inline]
fn lookup3_final(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

/// Hash a single 32-bit key.
#[inline]
pub fn hash_uint(kx: u32) -> u32 {
    let init = lookup3_init(1);
    lookup3_final(init.wrapping_add(kx), init, init)
}

/// Hash two 32-bit keys.
#[inline]
pub fn hash_uint2(kx: u32, ky: u32) -> u32 {
    let init = lookup3_init(2);
    lookup3_final(init.wrapping_add(kx), init.wrapping_add(ky), init)
}

/// Hash three 32-bit keys.
#[inline]
pub fn hash_uint3(kx: u32, ky: u32, kz: u32) -> u32 {
    let init = lookup3_init(3);
    lookup3_final(
        init.wrapping_add(kx),
        init.wrapping_add(ky),
        init.wrapping_add(kz),
    )
}

/// MurmurHash3 32-bit finalizer. Full avalanche, `fmix32(0) == 0`.
#[inline]
pub fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Map a hash to a float in `[0, 1)` using its top 24 bits.
#[inline]
pub fn hash_to_float(h: u32) -> f32 {
    (h >> 8) as f32 * (1.0 / 16_777_216.0)
}

/// Uniform float in `[0, 1)` keyed by three integers.
#[inline]
pub fn hash_uint3_to_float(kx: u32, ky: u32, kz: u32) -> f32 {
    hash_to_float(fmix32(hash_uint3(kx, ky, kz)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(hash_uint2(3, 7), hash_uint2(3, 7));
        assert_eq!(hash_uint3(1, 2, 3), hash_uint3(1, 2, 3));
    }

    #[test]
    fn test_key_order_matters() {
        assert_ne!(hash_uint2(3, 7), hash_uint2(7, 3));
        assert_ne!(hash_uint3(1, 2, 3), hash_uint3(3, 2, 1));
    }

    #[test]
    fn test_fmix32_zero() {
        assert_eq!(fmix32(0), 0);
        assert_ne!(fmix32(1), 1);
    }

    #[test]
    fn test_float_range() {
        assert_eq!(hash_to_float(0), 0.0);
        assert!(hash_to_float(u32::MAX) < 1.0);
        for i in 0..1000 {
            let f = hash_uint3_to_float(i, i * 3, 17);
            assert!((0.0..1.0).contains(&f));
        }
    }

    #[test]
    fn test_float_mean() {
        // 64k samples of a uniform variable: mean within a few sigma of 0.5
        let n = 65_536u32;
        let sum: f64 = (0..n).map(|i| hash_uint3_to_float(i, 0, 5) as f64).sum();
        let mean = sum / n as f64;
        assert!((mean - 0.5).abs() < 0.01, "mean = {mean}");
    }

    #[test]
    fn test_few_collisions() {
        let mut seen = std::collections::HashSet::new();
        for x in 0..64u32 {
            for y in 0..64u32 {
                seen.insert(hash_uint2(x, y));
            }
        }
        assert!(seen.len() > 4090);
    }
}
