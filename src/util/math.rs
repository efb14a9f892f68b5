//! Math type re-exports and Monte Carlo helpers.
//!
//! This module re-exports types from `glam` and provides the small set of
//! sampling and MIS routines shared by the kernels and the reference scene.

pub use glam::{Mat3, Vec2, Vec3, Vec4};

use std::f32::consts::{FRAC_1_PI, PI};

/// 1 / (4 pi), the pdf of a uniformly sampled sphere direction.
pub const INV_FOUR_PI: f32 = 0.25 * FRAC_1_PI;

/// Largest component of a vector.
#[inline]
pub fn max3(v: Vec3) -> f32 {
    v.max_element()
}

/// Average of the three components.
#[inline]
pub fn average(v: Vec3) -> f32 {
    (v.x + v.y + v.z) * (1.0 / 3.0)
}

/// True when every component is exactly zero.
#[inline]
pub fn is_zero(v: Vec3) -> bool {
    v == Vec3::ZERO
}

/// Replace NaN/inf components by zero and clamp negatives to zero.
#[inline]
pub fn ensure_finite_nonneg(v: Vec3) -> Vec3 {
    let f = |x: f32| if x.is_finite() && x > 0.0 { x } else { 0.0 };
    Vec3::new(f(v.x), f(v.y), f(v.z))
}

/// Power heuristic (beta = 2) weight for the strategy with pdf `a`.
#[inline]
pub fn power_heuristic(a: f32, b: f32) -> f32 {
    let a2 = a * a;
    let denom = a2 + b * b;
    if denom > 0.0 {
        a2 / denom
    } else {
        0.0
    }
}

/// Offset a ray origin off a surface along its geometric normal to avoid
/// self intersection. The offset scales with the magnitude of the point.
#[inline]
pub fn ray_offset(p: Vec3, ng: Vec3) -> Vec3 {
    const EPSILON: f32 = 1e-4;
    let scale = p.abs().max_element().max(1.0);
    p + ng * (EPSILON * scale)
}

/// Build an orthonormal basis `(t, b)` around unit vector `n`.
#[inline]
pub fn make_orthonormals(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let t = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bt = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (t, bt)
}

/// Concentric mapping of the unit square to the unit disk.
#[inline]
pub fn sample_uniform_disk(u: f32, v: f32) -> Vec2 {
    let a = 2.0 * u - 1.0;
    let b = 2.0 * v - 1.0;
    if a == 0.0 && b == 0.0 {
        return Vec2::ZERO;
    }
    let (r, phi) = if a * a > b * b {
        (a, (PI / 4.0) * (b / a))
    } else {
        (b, (PI / 2.0) - (PI / 4.0) * (a / b))
    };
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// Cosine weighted hemisphere around `n`. Returns direction and pdf.
#[inline]
pub fn sample_cos_hemisphere(n: Vec3, u: f32, v: f32) -> (Vec3, f32) {
    let d = sample_uniform_disk(u, v);
    let z = (1.0 - d.length_squared()).max(0.0).sqrt();
    let (t, b) = make_orthonormals(n);
    let dir = t * d.x + b * d.y + n * z;
    (dir, z * FRAC_1_PI)
}

/// Uniform direction on the unit sphere, pdf `1 / (4 pi)`.
#[inline]
pub fn sample_uniform_sphere(u: f32, v: f32) -> Vec3 {
    let z = 1.0 - 2.0 * u;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * v;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Uniform direction inside a cone of half angle `acos(cos_max)` around
/// `axis`. Returns direction and solid angle pdf.
#[inline]
pub fn sample_uniform_cone(axis: Vec3, cos_max: f32, u: f32, v: f32) -> (Vec3, f32) {
    let z = 1.0 - u * (1.0 - cos_max);
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * v;
    let (t, b) = make_orthonormals(axis);
    let dir = t * (r * phi.cos()) + b * (r * phi.sin()) + axis * z;
    (dir, 1.0 / (2.0 * PI * (1.0 - cos_max)))
}

/// Reflect `i` (pointing away from the surface) about `n`.
#[inline]
pub fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    2.0 * n.dot(i) * n - i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_heuristic() {
        assert_eq!(power_heuristic(0.0, 0.0), 0.0);
        assert_eq!(power_heuristic(1.0, 0.0), 1.0);
        assert!((power_heuristic(1.0, 1.0) - 0.5).abs() < 1e-6);
        let w = power_heuristic(2.0, 1.0) + power_heuristic(1.0, 2.0);
        assert!((w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthonormals() {
        for n in [Vec3::X, Vec3::Y, Vec3::Z, -Vec3::Z, Vec3::new(1.0, 2.0, -3.0).normalize()] {
            let (t, b) = make_orthonormals(n);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
            assert!((b.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cos_hemisphere_above_surface() {
        let n = Vec3::new(0.3, -0.2, 0.9).normalize();
        for i in 0..16 {
            for j in 0..16 {
                let (d, pdf) = sample_cos_hemisphere(n, (i as f32 + 0.5) / 16.0, (j as f32 + 0.5) / 16.0);
                assert!(d.dot(n) >= -1e-5);
                assert!((d.length() - 1.0).abs() < 1e-4);
                assert!((pdf - d.dot(n).max(0.0) * FRAC_1_PI).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_cone_within_angle() {
        let cos_max = 0.9;
        let (d, pdf) = sample_uniform_cone(Vec3::Y, cos_max, 0.7, 0.3);
        assert!(d.dot(Vec3::Y) >= cos_max - 1e-5);
        assert!(pdf > 0.0);
    }

    #[test]
    fn test_ensure_finite() {
        let v = ensure_finite_nonneg(Vec3::new(f32::NAN, -1.0, 2.0));
        assert_eq!(v, Vec3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_reflect() {
        let r = reflect(Vec3::new(1.0, 1.0, 0.0).normalize(), Vec3::Y);
        assert!((r - Vec3::new(-1.0, 1.0, 0.0).normalize()).length() < 1e-5);
    }
}
