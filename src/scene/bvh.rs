//! BVH node and triangle types, plus ray traversal.
//!
//! Flat array layout:
//! - 32-byte nodes, children of an internal node are adjacent
//! - leaves index into a reordered triangle index list

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use smallvec::SmallVec;

use crate::kernel::types::Ray;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test. Returns the entry distance when the box overlaps `[0, t_max]`.
    #[inline]
    pub fn intersect(&self, origin: Vec3, inv_dir: Vec3, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let t_near = t0.min(t1).max_element().max(0.0);
        let t_far = t0.max(t1).min_element().min(t_max);
        (t_near <= t_far).then_some(t_near)
    }
}

/// BVH node (32 bytes).
///
/// Internal node: left_or_first = left child index, count = 0
/// Leaf node: left_or_first = first triangle index, count > 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: Vec3::from_array(self.aabb_min),
            max: Vec3::from_array(self.aabb_max),
        }
    }
}

/// World-space triangle of a scene object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub object: u32,
}

/// Barycentric hit on a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

impl Triangle {
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        b.grow_point(self.v0);
        b.grow_point(self.v1);
        b.grow_point(self.v2);
        b
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Unit geometric normal, counter-clockwise winding.
    pub fn normal(&self) -> Vec3 {
        (self.v1 - self.v0).cross(self.v2 - self.v0).normalize_or_zero()
    }

    /// Moller-Trumbore intersection within `(0, t_max)`.
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        let pvec = ray.d.cross(e2);
        let det = e1.dot(pvec);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let tvec = ray.p - self.v0;
        let u = tvec.dot(pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let qvec = tvec.cross(e1);
        let v = ray.d.dot(qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(qvec) * inv_det;
        (t > 0.0 && t < t_max).then_some(TriangleHit { t, u, v })
    }
}

/// Built BVH.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered triangle indices (leaves reference into this).
    pub tri_indices: Vec<usize>,
}

impl Bvh {
    /// Walk the nodes overlapping the ray and call `visit` for every
    /// triangle hit before the current far bound.
    ///
    /// `visit` returns the new far bound: the hit distance to look for closer
    /// hits only, the old bound to keep collecting, or zero to stop.
    pub fn traverse(
        &self,
        triangles: &[Triangle],
        ray: &Ray,
        mut visit: impl FnMut(usize, TriangleHit) -> f32,
    ) {
        if self.tri_indices.is_empty() {
            return;
        }
        let inv_dir = ray.d.recip();
        let mut t_max = ray.t;
        let mut stack: SmallVec<[u32; 64]> = SmallVec::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if node.aabb().intersect(ray.p, inv_dir, t_max).is_none() {
                continue;
            }
            if !node.is_leaf() {
                stack.push(node.left_or_first + 1);
                stack.push(node.left_or_first);
                continue;
            }
            let first = node.left_or_first as usize;
            for &prim in &self.tri_indices[first..first + node.count as usize] {
                if let Some(hit) = triangles[prim].intersect(ray, t_max) {
                    t_max = visit(prim, hit);
                    if t_max <= 0.0 {
                        return;
                    }
                }
            }
        }
    }

    /// Closest triangle hit accepted by `filter`.
    pub fn intersect_closest(
        &self,
        triangles: &[Triangle],
        ray: &Ray,
        filter: impl Fn(&Triangle) -> bool,
    ) -> Option<(usize, TriangleHit)> {
        let mut closest: Option<(usize, TriangleHit)> = None;
        self.traverse(triangles, ray, |prim, hit| {
            if filter(&triangles[prim]) {
                closest = Some((prim, hit));
            }
            closest.map_or(ray.t, |(_, h)| h.t)
        });
        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> Triangle {
        Triangle {
            v0: Vec3::new(-1.0, -1.0, 0.0),
            v1: Vec3::new(1.0, -1.0, 0.0),
            v2: Vec3::new(0.0, 1.0, 0.0),
            object: 0,
        }
    }

    #[test]
    fn test_node_size() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
    }

    #[test]
    fn test_triangle_hit() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 2.0), Vec3::NEG_Z, f32::MAX);
        let hit = tri().intersect(&ray, ray.t).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-6);
        assert_eq!(tri().normal(), Vec3::Z);

        // Beyond t_max, behind the origin, outside the triangle
        assert!(tri().intersect(&ray, 1.0).is_none());
        let behind = Ray::new(Vec3::new(0.0, 0.0, 2.0), Vec3::Z, f32::MAX);
        assert!(tri().intersect(&behind, f32::MAX).is_none());
        let outside = Ray::new(Vec3::new(5.0, 0.0, 2.0), Vec3::NEG_Z, f32::MAX);
        assert!(tri().intersect(&outside, f32::MAX).is_none());
    }

    #[test]
    fn test_aabb_slab() {
        let mut b = Aabb::EMPTY;
        b.grow_point(Vec3::splat(-1.0));
        b.grow_point(Vec3::splat(1.0));
        let d = Vec3::NEG_Z;
        assert_eq!(b.intersect(Vec3::new(0.0, 0.0, 5.0), d.recip(), f32::MAX), Some(4.0));
        assert!(b.intersect(Vec3::new(0.0, 0.0, 5.0), d.recip(), 3.0).is_none());
        assert!(b.intersect(Vec3::new(3.0, 0.0, 5.0), d.recip(), f32::MAX).is_none());
        // Origin inside
        assert_eq!(b.intersect(Vec3::ZERO, d.recip(), f32::MAX), Some(0.0));
    }
}
