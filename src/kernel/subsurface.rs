//! Subsurface scattering through a disk probe.
//!
//! Entering a subsurface closure stores the entry point in the path's ray
//! (origin and normal) and queues the probe kernel. The probe picks a point
//! on a disk of the scattering radius in the tangent plane and shoots a ray
//! back at the same object to find the exit point, which is then shaded as
//! a diffuse surface with the closure's albedo.

use glam::Vec3;

use super::closure::{BsdfSample, ClosureType, ShaderData};
use super::path_state::path_state_terminate;
use super::rng::{path_state_rng_2d, PRNG_BOUNCE_NUM, PRNG_SUBSURFACE_U};
use super::state::{PathState, SubsurfaceState};
use super::types::{DeviceKernel, PathRayFlag, Ray};
use super::{KernelGlobals, Lane};
use crate::util::math::{make_orthonormals, max3, sample_uniform_disk};

/// Smallest probe radius, keeps the probe ray from degenerating.
const MIN_RADIUS: f32 = 1e-4;

/// Enter the subsurface closure picked by `bs`.
pub(super) fn subsurface_bounce(state: &mut PathState, sd: &ShaderData, bs: &BsdfSample) {
    let Some(sc) = sd.closures.get(bs.closure) else {
        path_state_terminate(&mut state.path);
        return;
    };
    let ClosureType::Subsurface { radius, roughness } = sc.ty else {
        path_state_terminate(&mut state.path);
        return;
    };

    state.subsurface = SubsurfaceState {
        albedo: sc.weight,
        radius,
        roughness,
    };

    let path = &mut state.path;
    path.throughput /= bs.pdf;
    if path.bounce == 0 {
        path.diffuse_glossy_ratio = Vec3::ONE;
    }
    path.rng_offset += PRNG_BOUNCE_NUM;

    let mut entry = Ray::new(sd.p, sd.n, 0.0);
    entry.time = sd.time;
    state.ray = entry;
    path.queued_kernel = DeviceKernel::IntersectSubsurface;
}

/// Find the exit point of a subsurface path on the entered object.
pub(super) fn intersect_subsurface(kg: &KernelGlobals, lane: &mut Lane) {
    let Lane { state, stats, .. } = lane;
    let entry = state.ray.p;
    let n = state.ray.d;
    let object = state.isect.object;
    let radius = max3(state.subsurface.radius).max(MIN_RADIUS);

    let (u, v) = path_state_rng_2d(&state.path, PRNG_SUBSURFACE_U);
    let disk = sample_uniform_disk(u, v) * radius;
    let (tangent, bitangent) = make_orthonormals(n);
    let origin = entry + tangent * disk.x + bitangent * disk.y + n * radius;

    let mut probe = Ray::new(origin, -n, 2.0 * radius);
    probe.time = state.ray.time;

    match kg.device.intersect_local(&probe, object) {
        Some(hit) => {
            state.ray = probe;
            state.isect = hit;
            state.path.flag |= PathRayFlag::SUBSURFACE;
            state.path.shader_sort_key = hit.object;
            state.path.queued_kernel = DeviceKernel::ShadeSurface;
        }
        None => {
            stats.subsurface_misses += 1;
            path_state_terminate(&mut state.path);
        }
    }
}
