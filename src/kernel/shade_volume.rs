use glam::Vec3;

use super::closure::{volume_phase_eval, ShaderData, ShaderDataFlag};
use super::emission::{direct_emission, EmissionPoint};
use super::intersect::next_kernel_after_intersect;
use super::path_state::{path_state_next, path_state_russian_roulette, path_state_terminate};
use super::rng::{
    path_state_rng_1d, path_state_rng_2d, PRNG_LIGHT_PICK, PRNG_LIGHT_TERMINATE, PRNG_LIGHT_U, PRNG_PHASE_U,
    PRNG_SCATTER_DISTANCE,
};
use super::shade_shadow::shadow_path_setup;
use super::state::VolumeStack;
use super::types::{ClosureLabel, DeviceKernel, PathRayFlag, Ray};
use super::{KernelGlobals, Lane};
use crate::device::VolumeCoefficients;
use crate::util::math::{average, sample_uniform_sphere, INV_FOUR_PI};

/// Update a volume stack for a ray crossing the boundary at `sd`.
///
/// Returns false when a volume could not be entered because the stack is full.
pub(super) fn volume_stack_enter_exit(stack: &mut VolumeStack, sd: &ShaderData) -> bool {
    if sd.flag.contains(ShaderDataFlag::BACKFACING) {
        stack.exit(sd.object);
        true
    } else {
        stack.enter(sd.object, sd.volume_shader)
    }
}

/// Free-flight distance sampled in one channel picked uniformly.
///
/// `None` when the picked channel does not attenuate.
fn sample_distance(sigma_t: Vec3, xi: f32) -> Option<f32> {
    let scaled = xi * 3.0;
    let channel = (scaled as usize).min(2);
    let xi = (scaled - channel as f32).clamp(0.0, 1.0 - f32::EPSILON);
    let sigma = sigma_t[channel];
    if sigma > 0.0 {
        Some(-(1.0 - xi).ln() / sigma)
    } else {
        None
    }
}

/// Integral of `exp(-sigma_t * s)` over `[0, t]`, per channel.
fn emission_integral(sigma_t: Vec3, t: f32) -> Vec3 {
    Vec3::from_array(sigma_t.to_array().map(|s| if s > 0.0 { (1.0 - (-s * t).exp()) / s } else { t }))
}

/// Scatter inside the volume at `p`: direct light through the phase
/// function, then a new direction for the path.
fn volume_scatter(kg: &KernelGlobals, lane: &mut Lane, p: Vec3) {
    let kd = kg.data;
    let state = &mut lane.state;
    let time = state.ray.time;

    if kg.device.num_lights() > 0 {
        let pick = path_state_rng_1d(&state.path, PRNG_LIGHT_PICK);
        let (u, v) = path_state_rng_2d(&state.path, PRNG_LIGHT_U);
        if let Some(ls) = kg.device.light_sample(p, pick, u, v) {
            let (eval, pdf) = volume_phase_eval();
            let point = EmissionPoint { p, ng: None, n: None, time };
            let rand_terminate = path_state_rng_1d(&state.path, PRNG_LIGHT_TERMINATE);
            if let Some(light) = direct_emission(kd, &point, &ls, eval, pdf, state.path.flag, rand_terminate) {
                shadow_path_setup(state, &light, PathRayFlag::PASS_VOLUME);
            }
        }
    }

    let (u, v) = path_state_rng_2d(&state.path, PRNG_PHASE_U);
    let d = sample_uniform_sphere(u, v);

    let path = &mut state.path;
    if path.bounce == 0 {
        path.diffuse_glossy_ratio = Vec3::ONE;
    }
    if !path_state_next(kd, path, ClosureLabel::VOLUME_SCATTER) {
        path_state_terminate(path);
        return;
    }
    path.mis_ray_pdf = INV_FOUR_PI;
    path.mis_ray_t = 0.0;
    path.min_ray_pdf = path.min_ray_pdf.min(INV_FOUR_PI);

    let mut ray = Ray::new(p, d, f32::MAX);
    ray.time = time;
    state.ray = ray;
    path.queued_kernel = DeviceKernel::IntersectClosest;
}

/// Integrate the homogeneous volumes on the stack along the segment up to
/// the next intersection: emission, absorption and single scattering.
pub(super) fn shade_volume(kg: &KernelGlobals, lane: &mut Lane) {
    let kd = kg.data;
    let ray = lane.state.ray;
    let isect = lane.state.isect;
    let segment_t = if isect.is_hit() { isect.t } else { ray.t };

    let coeffs = VolumeCoefficients::from_stack(kg.device, &lane.state.volume_stack);
    let sigma_t = coeffs.sigma_t();

    {
        let path = &lane.state.path;
        if coeffs.emission != Vec3::ZERO {
            let l = path.throughput * coeffs.emission * emission_integral(sigma_t, segment_t);
            lane.radiance
                .accum_emission(kd, path.flag, path.bounce, l, path.diffuse_glossy_ratio);
        }
    }

    let scatter_t = if coeffs.sigma_s != Vec3::ZERO {
        let xi = path_state_rng_1d(&lane.state.path, PRNG_SCATTER_DISTANCE);
        sample_distance(sigma_t, xi).filter(|&t| t < segment_t)
    } else {
        None
    };

    let path = &mut lane.state.path;
    match scatter_t {
        Some(t) => {
            // Pdf of the channel mixture at distance t
            let transmittance = (-sigma_t * t).exp();
            let pdf = average(sigma_t * transmittance);
            if !(pdf > 0.0) {
                path_state_terminate(path);
                return;
            }
            path.throughput *= coeffs.sigma_s * transmittance / pdf;

            if !path_state_russian_roulette(kd, path) {
                path_state_terminate(path);
                return;
            }
            volume_scatter(kg, lane, ray.at(t));
        }
        None => {
            let transmittance = (-sigma_t * segment_t).exp();
            let probability = if coeffs.sigma_s != Vec3::ZERO {
                average(transmittance)
            } else {
                1.0
            };
            if !(probability > 0.0) {
                path_state_terminate(path);
                return;
            }
            path.throughput *= transmittance / probability;
            if path.throughput == Vec3::ZERO {
                path_state_terminate(path);
                return;
            }

            let next = next_kernel_after_intersect(&isect);
            if next == DeviceKernel::ShadeSurface {
                path.shader_sort_key = isect.object;
            }
            path.queued_kernel = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_distance_channel() {
        let sigma = Vec3::new(1.0, 0.0, 2.0);
        // First third picks red
        let t = sample_distance(sigma, 0.0).unwrap();
        assert_eq!(t, 0.0);
        // Green does not attenuate
        assert!(sample_distance(sigma, 0.5).is_none());
        let t = sample_distance(sigma, 0.9).unwrap();
        assert!(t > 0.0 && t.is_finite());
    }

    #[test]
    fn test_emission_integral() {
        let i = emission_integral(Vec3::new(0.0, 1.0, 100.0), 2.0);
        assert_eq!(i.x, 2.0);
        assert!((i.y - (1.0 - (-2.0f32).exp())).abs() < 1e-6);
        assert!((i.z - 0.01).abs() < 1e-4);
    }
}
