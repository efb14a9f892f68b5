use glam::Vec3;

use super::types::{DeviceKernel, Intersection, OBJECT_NONE, PRIMITIVE_LAMP};
use super::{KernelGlobals, Lane};

/// Shading kernel for an intersection once volumes are handled.
pub(super) fn next_kernel_after_intersect(isect: &Intersection) -> DeviceKernel {
    if !isect.is_hit() {
        DeviceKernel::ShadeBackground
    } else if isect.is_lamp() {
        DeviceKernel::ShadeLight
    } else {
        DeviceKernel::ShadeSurface
    }
}

/// Closest surface or lamp along the main ray.
pub(super) fn intersect_closest(kg: &KernelGlobals, lane: &mut Lane) {
    let state = &mut lane.state;
    let ray = state.ray;

    let mut isect = kg.device.intersect_closest(&ray).unwrap_or(Intersection::MISS);

    if kg.device.num_lights() > 0 {
        let mut lamp_ray = ray;
        if isect.is_hit() {
            lamp_ray.t = isect.t;
        }
        if let Some((lamp, t)) = kg.device.light_intersect(&lamp_ray) {
            if t < lamp_ray.t {
                isect = Intersection {
                    t,
                    u: 0.0,
                    v: 0.0,
                    prim: lamp,
                    object: OBJECT_NONE,
                    prim_type: PRIMITIVE_LAMP,
                    ng: Vec3::ZERO,
                };
            }
        }
    }

    state.isect = isect;
    let next = if state.volume_stack.is_empty() {
        next_kernel_after_intersect(&isect)
    } else {
        DeviceKernel::ShadeVolume
    };
    if next == DeviceKernel::ShadeSurface {
        state.path.shader_sort_key = isect.object;
    }
    state.path.queued_kernel = next;
}

/// Gather transparent occluders along the shadow ray.
pub(super) fn intersect_shadow(kg: &KernelGlobals, lane: &mut Lane) {
    let state = &mut lane.state;
    let query = kg.device.intersect_shadow(&state.shadow_ray, &mut state.shadow_isect);

    let hits_left = kg
        .data
        .integrator
        .transparent_max_bounce
        .saturating_sub(state.shadow_path.transparent_bounce) as usize;
    if query.opaque || query.num_hits > hits_left {
        state.clear_shadow();
        return;
    }

    state.shadow_path.num_hits = query.num_hits.min(u16::MAX as usize) as u16;
    state.shadow_path.queued_kernel = DeviceKernel::ShadeShadow;
}
