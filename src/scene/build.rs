//! Binned SAH builder for the scene BVH.
//!
//! Primitive references are binned by centroid on every axis and the
//! cheapest bin boundary is taken when it beats a leaf. Ranges too large
//! for a leaf that SAH cannot split fall back to a median split on the
//! widest centroid axis.

use std::ops::Range;

use glam::Vec3;

use super::bvh::{Aabb, Bvh, BvhNode, Triangle};

const SAH_BINS: usize = 16;

/// Cost of visiting a node, in triangle tests.
const NODE_COST: f32 = 1.0;

/// Ranges up to this size always become leaves.
const LEAF_SIZE: usize = 4;

/// Ranges above this size are split even when SAH prefers a leaf.
const MAX_LEAF_SIZE: usize = 16;

#[derive(Debug, Clone, Copy)]
struct PrimRef {
    bounds: Aabb,
    centroid: Vec3,
    index: usize,
}

/// Bin boundary on an axis: references in bins below `bin` go left.
#[derive(Debug, Clone, Copy)]
struct Split {
    axis: usize,
    bin: usize,
    cost: f32,
}

/// Maps centroids of one axis onto `SAH_BINS` bins.
struct Binning {
    axis: usize,
    lo: f32,
    scale: f32,
}

impl Binning {
    fn new(axis: usize, centroid_bounds: &Aabb) -> Option<Self> {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        (extent > 1e-8).then(|| Self {
            axis,
            lo,
            scale: SAH_BINS as f32 / extent,
        })
    }

    #[inline]
    fn bin(&self, centroid: Vec3) -> usize {
        (((centroid[self.axis] - self.lo) * self.scale) as usize).min(SAH_BINS - 1)
    }
}

fn leaf(bounds: &Aabb, first: usize, count: usize) -> BvhNode {
    BvhNode {
        aabb_min: bounds.min.to_array(),
        left_or_first: first as u32,
        aabb_max: bounds.max.to_array(),
        count: count as u32,
    }
}

fn interior(bounds: &Aabb, left: usize) -> BvhNode {
    leaf(bounds, left, 0)
}

fn widest_axis(bounds: &Aabb) -> usize {
    let d = bounds.max - bounds.min;
    if d.x >= d.y && d.x >= d.z {
        0
    } else if d.y >= d.z {
        1
    } else {
        2
    }
}

/// Cheapest split of `refs` along one axis, both sides non-empty.
fn best_split_on_axis(refs: &[PrimRef], binning: &Binning, inv_parent_area: f32) -> Option<Split> {
    let mut bins = [(Aabb::EMPTY, 0usize); SAH_BINS];
    for r in refs {
        let bin = &mut bins[binning.bin(r.centroid)];
        bin.0.grow(&r.bounds);
        bin.1 += 1;
    }

    // Area and count of everything at or above each bin
    let mut above = [(0.0f32, 0usize); SAH_BINS];
    let (mut bounds, mut count) = (Aabb::EMPTY, 0);
    for i in (1..SAH_BINS).rev() {
        bounds.grow(&bins[i].0);
        count += bins[i].1;
        above[i] = (bounds.area(), count);
    }

    let (mut bounds, mut count) = (Aabb::EMPTY, 0);
    let mut best: Option<Split> = None;
    for (i, &(right_area, right_count)) in above.iter().enumerate().skip(1) {
        bounds.grow(&bins[i - 1].0);
        count += bins[i - 1].1;
        if count == 0 || right_count == 0 {
            continue;
        }
        let cost = NODE_COST + (count as f32 * bounds.area() + right_count as f32 * right_area) * inv_parent_area;
        if best.map_or(true, |b| cost < b.cost) {
            best = Some(Split {
                axis: binning.axis,
                bin: i,
                cost,
            });
        }
    }
    best
}

fn best_split(refs: &[PrimRef], bounds: &Aabb, centroid_bounds: &Aabb) -> Option<(Split, Binning)> {
    let area = bounds.area();
    let inv_parent_area = if area > 0.0 { 1.0 / area } else { 0.0 };
    (0..3)
        .filter_map(|axis| Binning::new(axis, centroid_bounds))
        .filter_map(|binning| best_split_on_axis(refs, &binning, inv_parent_area).map(|split| (split, binning)))
        .min_by(|a, b| a.0.cost.total_cmp(&b.0.cost))
}

/// Reorder `refs` into two halves and return the size of the left one,
/// or `None` when the range should stay a leaf.
fn split_range(refs: &mut [PrimRef], bounds: &Aabb, centroid_bounds: &Aabb) -> Option<usize> {
    let count = refs.len();
    if count <= LEAF_SIZE {
        return None;
    }

    if let Some((split, binning)) = best_split(refs, bounds, centroid_bounds) {
        if split.cost < count as f32 {
            tracing::trace!(axis = split.axis, bin = split.bin, cost = split.cost, count, "sah split");
            refs.sort_unstable_by_key(|r| binning.bin(r.centroid) >= split.bin);
            return Some(refs.iter().take_while(|r| binning.bin(r.centroid) < split.bin).count());
        }
    }

    if count <= MAX_LEAF_SIZE {
        return None;
    }
    let axis = widest_axis(centroid_bounds);
    let mid = count / 2;
    refs.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));
    Some(mid)
}

/// Build a BVH over `triangles`. Indices in the result map into the
/// original slice, which is left untouched.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_bvh(triangles: &[Triangle]) -> Bvh {
    let mut refs: Vec<PrimRef> = triangles
        .iter()
        .enumerate()
        .map(|(index, t)| PrimRef {
            bounds: t.aabb(),
            centroid: t.centroid(),
            index,
        })
        .collect();

    let mut nodes = vec![leaf(&Aabb::EMPTY, 0, 0)];
    let mut pending: Vec<(usize, Range<usize>)> = Vec::new();
    if !refs.is_empty() {
        pending.push((0, 0..refs.len()));
    }

    while let Some((node, range)) = pending.pop() {
        let mut bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for r in &refs[range.clone()] {
            bounds.grow(&r.bounds);
            centroid_bounds.grow_point(r.centroid);
        }

        match split_range(&mut refs[range.clone()], &bounds, &centroid_bounds) {
            Some(left_count) => {
                let left = nodes.len();
                nodes.extend([leaf(&Aabb::EMPTY, 0, 0); 2]);
                nodes[node] = interior(&bounds, left);
                let mid = range.start + left_count;
                pending.push((left + 1, mid..range.end));
                pending.push((left, range.start..mid));
            }
            None => nodes[node] = leaf(&bounds, range.start, range.len()),
        }
    }

    Bvh {
        nodes,
        tri_indices: refs.into_iter().map(|r| r.index).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::types::Ray;

    fn make_tri(cx: f32, cy: f32, cz: f32) -> Triangle {
        Triangle {
            v0: Vec3::new(cx - 0.5, cy - 0.5, cz),
            v1: Vec3::new(cx + 0.5, cy - 0.5, cz),
            v2: Vec3::new(cx, cy + 0.5, cz),
            object: 0,
        }
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.tri_indices.len(), 0);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z, f32::MAX);
        assert!(bvh.intersect_closest(&[], &ray, |_| true).is_none());
    }

    #[test]
    fn test_single_triangle() {
        let bvh = build_bvh(&[make_tri(0.0, 0.0, 0.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
        assert_eq!(bvh.tri_indices.len(), 1);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        let tris: Vec<Triangle> = (0..100).map(|i| make_tri(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);
        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.tri_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = &bvh.nodes[0];
        assert!(root.aabb_min[0] < 0.0);
        assert!(root.aabb_max[0] > 198.0);
    }

    #[test]
    fn test_leaf_count_correct() {
        let tris = vec![make_tri(0.0, 0.0, 0.0), make_tri(1.0, 0.0, 0.0), make_tri(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_coincident_centroids_are_split() {
        let tris: Vec<Triangle> = (0..40).map(|_| make_tri(0.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);
        assert!(bvh.nodes.len() > 1);
        let leaves: Vec<&BvhNode> = bvh.nodes.iter().filter(|n| n.is_leaf()).collect();
        assert!(leaves.iter().all(|n| n.count as usize <= MAX_LEAF_SIZE));
        assert_eq!(leaves.iter().map(|n| n.count).sum::<u32>(), 40);
    }

    #[test]
    fn test_closest_hit_matches_brute_force() {
        // Stack of triangles along z, each one unit further away
        let tris: Vec<Triangle> = (0..40)
            .map(|i| make_tri((i % 5) as f32 * 0.04, 0.0, -(i as f32)))
            .collect();
        let bvh = build_bvh(&tris);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 1.0), Vec3::NEG_Z, f32::MAX);

        let (prim, hit) = bvh.intersect_closest(&tris, &ray, |_| true).unwrap();
        assert_eq!(prim, 0);
        assert!((hit.t - 1.0).abs() < 1e-5);

        // Filter skips the first object
        let (prim, _) = bvh.intersect_closest(&tris, &ray, |t| t.v0.z < -0.5).unwrap();
        assert_eq!(prim, 1);

        let mut all = 0;
        bvh.traverse(&tris, &ray, |_, _| {
            all += 1;
            ray.t
        });
        assert_eq!(all, 40);
    }
}
