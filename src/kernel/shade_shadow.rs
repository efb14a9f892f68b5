use super::closure::{ShaderData, ShaderDataFlag};
use super::emission::DirectLight;
use super::shade_volume::volume_stack_enter_exit;
use super::state::{PathState, ShadowPathData, SHADOW_ISECT_SIZE};
use super::types::{DeviceKernel, PathRayFlag};
use super::{KernelGlobals, Lane};
use crate::util::math::{is_zero, ray_offset};

/// Arm the shadow sub-path of `state` for a direct light sample.
///
/// `category` is the pass the contribution lands in when the path has not
/// scattered yet; later bounces inherit the path's own category.
pub(super) fn shadow_path_setup(state: &mut PathState, light: &DirectLight, category: PathRayFlag) {
    let path = &state.path;
    let mut flag = path.flag | PathRayFlag::SHADOW;
    if !flag.contains(PathRayFlag::ANY_PASS) {
        flag |= PathRayFlag::ANY_PASS | category;
    }
    let diffuse_glossy_ratio = if path.bounce == 0 {
        light.eval.diffuse_glossy_ratio()
    } else {
        path.diffuse_glossy_ratio
    };

    state.shadow_path = ShadowPathData {
        bounce: path.bounce,
        transparent_bounce: path.transparent_bounce,
        queued_kernel: if light.cast_shadow {
            DeviceKernel::IntersectShadow
        } else {
            DeviceKernel::ShadeShadow
        },
        flag,
        throughput: path.throughput * light.eval.sum(),
        diffuse_glossy_ratio,
        num_hits: 0,
    };
    state.shadow_ray = light.ray;
    if !light.cast_shadow {
        state.shadow_ray.t = 0.0;
    }
    state.shadow_volume_stack = state.volume_stack;
}

/// Attenuate the shadow ray by the transparent surfaces and volumes it
/// crosses, then add the light contribution if anything got through.
pub(super) fn shade_shadow(kg: &KernelGlobals, lane: &mut Lane) {
    let Lane {
        state, radiance, stats, ..
    } = lane;

    let ray = state.shadow_ray;
    let hits = state.shadow_isect;
    let num_hits = state.shadow_path.num_hits as usize;
    let mut throughput = state.shadow_path.throughput;
    let mut last_t = 0.0;

    for isect in hits.iter().take(num_hits.min(SHADOW_ISECT_SIZE)) {
        if !state.shadow_volume_stack.is_empty() {
            let mut segment = ray;
            segment.p = ray.at(last_t);
            segment.t = isect.t - last_t;
            throughput *= kg.device.volume_shadow(&segment, &state.shadow_volume_stack);
        }

        let mut sd = ShaderData::from_ray(&ray, isect);
        kg.device.shader_eval_surface(&mut sd, state.shadow_path.flag);
        throughput *= sd.transparency();
        if is_zero(throughput) {
            state.clear_shadow();
            return;
        }

        if sd.flag.contains(ShaderDataFlag::HAS_VOLUME)
            && !volume_stack_enter_exit(&mut state.shadow_volume_stack, &sd)
        {
            stats.volume_stack_overflows += 1;
        }
        state.shadow_path.transparent_bounce += 1;
        last_t = isect.t;
    }

    if num_hits > SHADOW_ISECT_SIZE {
        // More hits than recorded: continue from the last one
        let origin = ray_offset(ray.at(last_t), ray.d);
        state.shadow_ray.p = origin;
        state.shadow_ray.t = (ray.t - (origin - ray.p).length()).max(0.0);
        state.shadow_path.throughput = throughput;
        state.shadow_path.num_hits = 0;
        state.shadow_path.queued_kernel = DeviceKernel::IntersectShadow;
        return;
    }

    if !state.shadow_volume_stack.is_empty() {
        let mut segment = ray;
        segment.p = ray.at(last_t);
        segment.t = ray.t - last_t;
        throughput *= kg.device.volume_shadow(&segment, &state.shadow_volume_stack);
    }

    if !is_zero(throughput) {
        let shadow = &state.shadow_path;
        radiance.accum_light(kg.data, shadow.flag, shadow.bounce, throughput, shadow.diffuse_glossy_ratio);
    }
    state.clear_shadow();
}
