//! Path state transitions: initialization, bounce bookkeeping and Russian
//! roulette.

use glam::Vec3;

use super::rng::{path_state_rng_1d, PRNG_BASE_NUM, PRNG_BOUNCE_NUM, PRNG_TERMINATE};
use super::state::{PathData, PathState};
use super::types::{ClosureLabel, DeviceKernel, PathRayFlag};
use super::KernelData;
use crate::util::math::max3;

/// Reset a state for a new camera path.
pub fn path_state_init(kd: &KernelData, state: &mut PathState, render_pixel_index: u32, sample: u16, rng_hash: u32) {
    let mut flag = PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP | PathRayFlag::TRANSPARENT_BACKGROUND;
    if kd.film.denoising_passes {
        flag |= PathRayFlag::DENOISING_FEATURES;
    }
    if kd.integrator.max_bounce == 0 {
        flag |= PathRayFlag::TERMINATE;
    }

    state.path = PathData {
        render_pixel_index,
        sample,
        queued_kernel: DeviceKernel::IntersectClosest,
        rng_hash,
        rng_offset: PRNG_BASE_NUM,
        flag,
        throughput: Vec3::ONE,
        denoising_feature_throughput: Vec3::ONE,
        ..Default::default()
    };
    state.volume_stack.clear();
    state.clear_shadow();
}

/// Advance the bounce counters for a scattering event with `label`.
///
/// Returns `false` when the event would take a counter past its maximum;
/// the caller terminates the path. A counter that reaches its maximum flags
/// the path to terminate at the next vertex, after emission is gathered.
pub fn path_state_next(kd: &KernelData, path: &mut PathData, label: ClosureLabel) -> bool {
    let it = &kd.integrator;

    if label.contains(ClosureLabel::TRANSPARENT) {
        if path.transparent_bounce >= it.transparent_max_bounce {
            return false;
        }
        path.transparent_bounce += 1;
        path.flag |= PathRayFlag::TRANSPARENT;
        if path.transparent_bounce >= it.transparent_max_bounce {
            path.flag |= PathRayFlag::TERMINATE;
        }
        path.rng_offset += PRNG_BOUNCE_NUM;
        return true;
    }

    let (counter, max) = if label.contains(ClosureLabel::VOLUME_SCATTER) {
        (&mut path.volume_bounce, it.max_volume_bounce)
    } else if label.contains(ClosureLabel::TRANSMIT) {
        (&mut path.transmission_bounce, it.max_transmission_bounce)
    } else if label.contains(ClosureLabel::DIFFUSE) {
        (&mut path.diffuse_bounce, it.max_diffuse_bounce)
    } else {
        (&mut path.glossy_bounce, it.max_glossy_bounce)
    };
    if *counter >= max || path.bounce >= it.max_bounce {
        return false;
    }
    *counter += 1;
    let category_at_max = *counter >= max;
    path.bounce += 1;

    let mut flag = path.flag;
    if category_at_max || path.bounce >= it.max_bounce {
        flag |= PathRayFlag::TERMINATE;
    }
    flag.remove(PathRayFlag::RAY_TYPE | PathRayFlag::MIS_SKIP);

    if label.contains(ClosureLabel::VOLUME_SCATTER) {
        flag |= PathRayFlag::VOLUME_SCATTER;
        flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
        if path.bounce == 1 {
            flag |= PathRayFlag::PASS_VOLUME | PathRayFlag::ANY_PASS;
        }
    } else {
        flag.remove(PathRayFlag::TRANSPARENT_BACKGROUND);
        flag |= if label.contains(ClosureLabel::TRANSMIT) {
            PathRayFlag::TRANSMIT
        } else {
            PathRayFlag::REFLECT
        };

        if label.contains(ClosureLabel::DIFFUSE) {
            flag |= PathRayFlag::DIFFUSE;
        } else if label.contains(ClosureLabel::GLOSSY) {
            flag |= PathRayFlag::GLOSSY;
        } else {
            flag |= PathRayFlag::GLOSSY | PathRayFlag::SINGULAR | PathRayFlag::MIS_SKIP;
        }

        if path.bounce == 1 {
            flag |= PathRayFlag::ANY_PASS
                | if label.contains(ClosureLabel::TRANSMIT) {
                    PathRayFlag::PASS_TRANSMISSION
                } else {
                    PathRayFlag::PASS_DIFFUSE_GLOSSY
                };
        }
    }

    path.flag = flag;
    path.rng_offset += PRNG_BOUNCE_NUM;
    true
}

/// Probability of continuing the path at the current vertex.
///
/// Zero when the path was flagged to terminate; one before the minimum
/// bounce count; otherwise the largest throughput component, capped at one.
pub fn path_state_continuation_probability(kd: &KernelData, path: &PathData) -> f32 {
    if path.flag.contains(PathRayFlag::TERMINATE) {
        return 0.0;
    }
    if path.flag.contains(PathRayFlag::TRANSPARENT) {
        if path.transparent_bounce <= kd.integrator.transparent_min_bounce {
            return 1.0;
        }
    } else if path.bounce <= kd.integrator.min_bounce {
        return 1.0;
    }
    max3(path.throughput.abs()).min(1.0)
}

/// Russian roulette. Returns `false` when the path terminates; survivors
/// are rescaled by `1 / p` when `p < 1`.
pub fn path_state_russian_roulette(kd: &KernelData, path: &mut PathData) -> bool {
    let probability = path_state_continuation_probability(kd, path);
    if probability <= 0.0 {
        return false;
    }
    if probability < 1.0 {
        if path_state_rng_1d(path, PRNG_TERMINATE) >= probability {
            return false;
        }
        path.throughput /= probability;
    }
    true
}

/// Mark the main path as finished. The shadow sub-path, if armed, still runs.
#[inline]
pub fn path_state_terminate(path: &mut PathData) {
    path.queued_kernel = DeviceKernel::None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn kernel_data(f: impl FnOnce(&mut Settings)) -> KernelData {
        let mut settings = Settings::default();
        f(&mut settings);
        KernelData::new(&settings)
    }

    fn camera_path(kd: &KernelData) -> PathData {
        let mut state = PathState::default();
        path_state_init(kd, &mut state, 0, 0, 1234);
        state.path
    }

    #[test]
    fn test_init() {
        let kd = KernelData::default();
        let path = camera_path(&kd);
        assert_eq!(path.queued_kernel, DeviceKernel::IntersectClosest);
        assert!(path.flag.contains(PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP));
        assert_eq!(path.throughput, Vec3::ONE);
        assert_eq!(path.rng_offset, PRNG_BASE_NUM);
    }

    #[test]
    fn test_diffuse_bounce_sets_category() {
        let kd = KernelData::default();
        let mut path = camera_path(&kd);
        assert!(path_state_next(&kd, &mut path, ClosureLabel::REFLECT | ClosureLabel::DIFFUSE));
        assert_eq!(path.bounce, 1);
        assert_eq!(path.diffuse_bounce, 1);
        assert!(path.flag.contains(PathRayFlag::DIFFUSE | PathRayFlag::REFLECT));
        assert!(path.flag.contains(PathRayFlag::PASS_DIFFUSE_GLOSSY | PathRayFlag::ANY_PASS));
        assert!(!path.flag.intersects(PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP));
        assert_eq!(path.rng_offset, PRNG_BASE_NUM + PRNG_BOUNCE_NUM);
    }

    #[test]
    fn test_counters_never_pass_max() {
        let kd = kernel_data(|s| {
            s.integrator.max_diffuse_bounce = 2;
            s.integrator.max_bounce = 10;
        });
        let mut path = camera_path(&kd);
        let label = ClosureLabel::REFLECT | ClosureLabel::DIFFUSE;
        assert!(path_state_next(&kd, &mut path, label));
        assert!(!path.flag.contains(PathRayFlag::TERMINATE));
        assert!(path_state_next(&kd, &mut path, label));
        assert!(path.flag.contains(PathRayFlag::TERMINATE));
        assert!(!path_state_next(&kd, &mut path, label));
        assert_eq!(path.diffuse_bounce, 2);
        assert_eq!(path_state_continuation_probability(&kd, &path), 0.0);
    }

    #[test]
    fn test_transparent_keeps_ray_type() {
        let kd = KernelData::default();
        let mut path = camera_path(&kd);
        assert!(path_state_next(&kd, &mut path, ClosureLabel::TRANSMIT | ClosureLabel::TRANSPARENT));
        assert_eq!(path.bounce, 0);
        assert_eq!(path.transparent_bounce, 1);
        assert!(path.flag.contains(PathRayFlag::CAMERA | PathRayFlag::TRANSPARENT_BACKGROUND));
    }

    #[test]
    fn test_roulette_rescales_only_below_one() {
        let kd = kernel_data(|s| s.integrator.min_bounce = 0);
        let mut path = camera_path(&kd);
        path.bounce = 1;

        path.throughput = Vec3::new(2.0, 0.5, 0.1);
        assert!(path_state_russian_roulette(&kd, &mut path));
        assert_eq!(path.throughput, Vec3::new(2.0, 0.5, 0.1));

        for sample in 0..64 {
            path.sample = sample;
            path.throughput = Vec3::splat(0.5);
            if path_state_russian_roulette(&kd, &mut path) {
                assert_eq!(path.throughput, Vec3::ONE);
            }
        }
    }

    #[test]
    fn test_min_bounce_protects_path() {
        let kd = KernelData::default();
        let mut path = camera_path(&kd);
        path.throughput = Vec3::splat(1e-6);
        assert_eq!(path_state_continuation_probability(&kd, &path), 1.0);
    }

    #[test]
    fn test_zero_max_bounce_terminates_at_first_hit() {
        let kd = kernel_data(|s| s.integrator.max_bounce = 0);
        let path = camera_path(&kd);
        assert_eq!(path_state_continuation_probability(&kd, &path), 0.0);
    }
}
