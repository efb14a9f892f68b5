use super::emission::emitter_hit_weight;
use super::path_state::path_state_terminate;
use super::rng::PRNG_BOUNCE_NUM;
use super::types::DeviceKernel;
use super::{KernelGlobals, Lane};
use crate::util::math::ray_offset;

/// A ray hit the surface of a light: add its emission and carry on behind
/// it, lights being invisible to everything but emission.
pub(super) fn shade_light(kg: &KernelGlobals, lane: &mut Lane) {
    let kd = kg.data;
    let Lane { state, radiance, .. } = lane;
    let isect = state.isect;
    let ray = state.ray;
    let path = &mut state.path;

    if let Some(ls) = kg.device.light_eval(isect.prim, &ray, isect.t) {
        if let Some(weight) = emitter_hit_weight(path, ls.shader, ls.pdf) {
            let l = path.throughput * ls.eval * weight;
            radiance.accum_emission(kd, path.flag, path.bounce, l, path.diffuse_glossy_ratio);
        }
    }

    if path.transparent_bounce >= kd.integrator.transparent_max_bounce {
        path_state_terminate(path);
        return;
    }
    path.transparent_bounce += 1;
    path.rng_offset += PRNG_BOUNCE_NUM;
    path.mis_ray_t += isect.t;

    let origin = ray_offset(ray.at(isect.t), ray.d);
    state.ray.p = origin;
    if ray.t < f32::MAX {
        state.ray.t = (ray.t - (origin - ray.p).length()).max(0.0);
    }
    state.path.queued_kernel = DeviceKernel::IntersectClosest;
}
