use glam::Vec2;

use super::path_state::path_state_init;
use super::rng::{path_rng_1d, path_rng_2d, path_rng_hash, PRNG_FILTER_U, PRNG_LENS_U, PRNG_TIME};
use super::{KernelGlobals, Lane, PathRadiance};
use crate::integrator::render_buffers::PassType;

/// Whether a pixel still needs samples under adaptive sampling.
fn need_sample_pixel(kg: &KernelGlobals, pixel_index: usize) -> bool {
    if !kg.data.adaptive.enabled {
        return true;
    }
    match kg.buffers.params().pass_offset(PassType::AdaptiveAuxBuffer) {
        Some(aux) => kg.buffers.get(pixel_index, aux + 3) == 0.0,
        None => true,
    }
}

/// Start a camera path for pixel `(x, y)` of the buffer and `sample`.
///
/// Returns `false` when no path was started: the pixel already converged or
/// the camera produced no ray. The lane stays idle in that case.
pub fn init_from_camera(kg: &KernelGlobals, lane: &mut Lane, x: u32, y: u32, sample: u32) -> bool {
    let params = kg.buffers.params();
    let pixel_index = y as usize * params.width as usize + x as usize;
    if !need_sample_pixel(kg, pixel_index) {
        return false;
    }

    let full_x = params.full_x + x;
    let full_y = params.full_y + y;
    let rng_hash = path_rng_hash(full_x, full_y, kg.data.integrator.seed);

    let (fu, fv) = path_rng_2d(rng_hash, sample, PRNG_FILTER_U);
    let filter_width = kg.data.integrator.filter_width;
    let raster = Vec2::new(
        full_x as f32 + 0.5 + (fu - 0.5) * filter_width,
        full_y as f32 + 0.5 + (fv - 0.5) * filter_width,
    );
    let lens = path_rng_2d(rng_hash, sample, PRNG_LENS_U);
    let time = path_rng_1d(rng_hash, sample, PRNG_TIME);

    let Some(ray) = kg.device.camera().generate_ray(raster, lens, time) else {
        return false;
    };

    path_state_init(kg.data, &mut lane.state, pixel_index as u32, sample as u16, rng_hash);
    lane.state.ray = ray;
    lane.radiance = PathRadiance::default();
    lane.active = true;
    true
}
