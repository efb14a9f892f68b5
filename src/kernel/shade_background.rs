use super::emission::emitter_hit_weight;
use super::path_state::path_state_terminate;
use super::types::PathRayFlag;
use super::{KernelGlobals, Lane};

/// The ray escaped the scene. Camera rays that only crossed transparent
/// surfaces count towards alpha on a transparent film; everything else
/// picks up the background radiance.
pub(super) fn shade_background(kg: &KernelGlobals, lane: &mut Lane) {
    let kd = kg.data;
    let Lane { state, radiance, .. } = lane;
    let path = &mut state.path;

    if kd.film.transparent && path.flag.contains(PathRayFlag::TRANSPARENT_BACKGROUND) {
        radiance.accum_transparent(path.throughput);
    } else {
        let bg = kg.device.background_eval(&state.ray);
        if let Some(weight) = emitter_hit_weight(path, bg.shader, bg.pdf) {
            let l = path.throughput * bg.eval * weight;
            radiance.accum_background(kd, path.flag, path.bounce, l, path.diffuse_glossy_ratio);
        }
    }

    path_state_terminate(path);
}
