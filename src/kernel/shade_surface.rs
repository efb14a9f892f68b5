use glam::Vec3;

use super::closure::{shader_bsdf_eval, shader_bsdf_sample, ShaderData, ShaderDataFlag};
use super::emission::{direct_emission, EmissionPoint};
use super::path_state::{path_state_next, path_state_russian_roulette, path_state_terminate};
use super::rng::{
    path_state_rng_1d, path_state_rng_2d, PRNG_BSDF_PICK, PRNG_BSDF_U, PRNG_LIGHT_PICK, PRNG_LIGHT_TERMINATE,
    PRNG_LIGHT_U,
};
use super::shade_shadow::shadow_path_setup;
use super::shade_volume::volume_stack_enter_exit;
use super::state::PathData;
use super::subsurface::subsurface_bounce;
use super::types::{ClosureLabel, DeviceKernel, PathRayFlag, Ray};
use super::{KernelGlobals, Lane, LaneStats, PathRadiance};
use crate::util::math::{average, ray_offset};

/// Albedo and normal guides, written at the first rough surface.
fn write_denoising_features(path: &mut PathData, radiance: &mut PathRadiance, sd: &ShaderData) {
    let features = sd.denoising_features();
    let total = average(features.albedo + features.specular_albedo);
    if total > 0.0 && average(features.specular_albedo) > 0.5 * total {
        // Mostly specular: look through it and write at the next hit
        path.denoising_feature_throughput *= features.specular_albedo;
        return;
    }
    radiance.denoising_albedo += path.denoising_feature_throughput * features.albedo;
    radiance.denoising_normal += features.normal;
    path.flag.remove(PathRayFlag::DENOISING_FEATURES);
}

/// Next event estimation from a surface point.
fn integrate_surface_direct_light(kg: &KernelGlobals, lane: &mut Lane, sd: &ShaderData, stats: &mut LaneStats) {
    if !sd.flag.contains(ShaderDataFlag::BSDF) || kg.device.num_lights() == 0 {
        return;
    }
    let state = &mut lane.state;
    let pick = path_state_rng_1d(&state.path, PRNG_LIGHT_PICK);
    let (u, v) = path_state_rng_2d(&state.path, PRNG_LIGHT_U);
    let Some(ls) = kg.device.light_sample(sd.p, pick, u, v) else {
        return;
    };

    let (eval, pdf) = shader_bsdf_eval(sd, ls.d);
    let point = EmissionPoint {
        p: sd.p,
        ng: Some(sd.ng),
        n: Some(sd.n),
        time: sd.time,
    };
    let rand_terminate = path_state_rng_1d(&state.path, PRNG_LIGHT_TERMINATE);
    let Some(light) = direct_emission(kg.data, &point, &ls, eval, pdf, state.path.flag, rand_terminate) else {
        return;
    };

    let category = if light.is_transmission {
        PathRayFlag::PASS_TRANSMISSION
    } else {
        PathRayFlag::PASS_DIFFUSE_GLOSSY
    };
    shadow_path_setup(state, &light, category);

    // Light behind a volume boundary: the shadow ray starts inside that volume
    if light.is_transmission
        && sd.flag.contains(ShaderDataFlag::HAS_VOLUME)
        && !volume_stack_enter_exit(&mut state.shadow_volume_stack, sd)
    {
        stats.volume_stack_overflows += 1;
    }
}

/// Sample the closures and continue the path, or terminate it.
fn integrate_surface_bsdf_bounce(kg: &KernelGlobals, lane: &mut Lane, sd: &ShaderData, stats: &mut LaneStats) {
    let state = &mut lane.state;
    let pick = path_state_rng_1d(&state.path, PRNG_BSDF_PICK);
    let (u, v) = path_state_rng_2d(&state.path, PRNG_BSDF_U);
    let Some(bs) = shader_bsdf_sample(sd, pick, u, v) else {
        path_state_terminate(&mut state.path);
        return;
    };

    if bs.label.contains(ClosureLabel::SUBSURFACE) {
        subsurface_bounce(state, sd, &bs);
        return;
    }

    let path = &mut state.path;
    if path.bounce == 0 {
        path.diffuse_glossy_ratio = bs.eval.diffuse_glossy_ratio();
    }
    let throughput = path.throughput * bs.eval.sum() / bs.pdf;
    if !path_state_next(kg.data, path, bs.label) {
        path_state_terminate(path);
        return;
    }
    path.throughput = throughput;

    if bs.label.contains(ClosureLabel::TRANSPARENT) {
        path.mis_ray_t += sd.t;
    } else {
        path.mis_ray_pdf = bs.pdf;
        path.mis_ray_t = 0.0;
        path.min_ray_pdf = path.min_ray_pdf.min(bs.pdf);
    }

    let transmit = bs.label.contains(ClosureLabel::TRANSMIT);
    let ray = &state.ray;
    state.ray = Ray {
        p: ray_offset(sd.p, if transmit { -sd.ng } else { sd.ng }),
        d: bs.omega_in,
        t: f32::MAX,
        time: sd.time,
        dp: ray.dp + ray.dd * sd.t,
        dd: ray.dd,
    };

    if transmit && sd.flag.contains(ShaderDataFlag::HAS_VOLUME) && !volume_stack_enter_exit(&mut state.volume_stack, sd)
    {
        stats.volume_stack_overflows += 1;
    }

    state.path.queued_kernel = DeviceKernel::IntersectClosest;
}

/// Shade a surface hit: emission, termination, direct light and bounce.
pub(super) fn shade_surface(kg: &KernelGlobals, lane: &mut Lane) {
    let kd = kg.data;
    let mut stats = lane.stats;

    let mut sd = ShaderData::from_ray(&lane.state.ray, &lane.state.isect);
    kg.device.shader_eval_surface(&mut sd, lane.state.path.flag);

    {
        let path = &mut lane.state.path;
        if path.flag.contains(PathRayFlag::SUBSURFACE) {
            sd.replace_with_diffuse(lane.state.subsurface.albedo);
            path.flag.remove(PathRayFlag::SUBSURFACE);
        }
        if sd.flag.contains(ShaderDataFlag::SHADOW_CATCHER) {
            path.flag |= PathRayFlag::SHADOW_CATCHER;
        }

        let radiance = &mut lane.radiance;
        if path.flag.contains(PathRayFlag::CAMERA) && radiance.depth.is_none() {
            radiance.depth = Some(sd.t);
        }

        if sd.flag.contains(ShaderDataFlag::EMISSION) {
            let l = path.throughput * sd.emission;
            radiance.accum_emission(kd, path.flag, path.bounce, l, path.diffuse_glossy_ratio);
        }

        if path.flag.contains(PathRayFlag::DENOISING_FEATURES) {
            write_denoising_features(path, radiance, &sd);
        }

        if sd.is_absorbing() || !path_state_russian_roulette(kd, path) {
            path_state_terminate(path);
            return;
        }

        let filter_glossy = kd.integrator.filter_glossy;
        if filter_glossy > 0.0 && path.min_ray_pdf < f32::MAX {
            let blur_pdf = filter_glossy * path.min_ray_pdf;
            if blur_pdf < 1.0 {
                sd.blur((1.0 - blur_pdf).sqrt() * 0.5);
            }
        }
    }

    integrate_surface_direct_light(kg, lane, &sd, &mut stats);
    integrate_surface_bsdf_bounce(kg, lane, &sd, &mut stats);

    if lane.state.path.throughput == Vec3::ZERO {
        path_state_terminate(&mut lane.state.path);
    }
    lane.stats = stats;
}
