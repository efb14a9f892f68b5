//! Light evaluation: next event estimation and MIS weights for emitters hit
//! by BSDF/phase sampled rays.

use glam::Vec3;

use super::closure::BsdfEval;
use super::state::PathData;
use super::types::{LightShaderFlag, PathRayFlag, Ray};
use super::KernelData;
use crate::device::LightSample;
use crate::util::math::{is_zero, max3, power_heuristic, ray_offset};

/// Light sample that survived evaluation, ready for a shadow ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectLight {
    /// BSDF (or phase) times light, MIS and roulette weights included.
    pub eval: BsdfEval,
    /// Ray from the shading point towards the light.
    pub ray: Ray,
    /// When false the light is unoccluded by definition.
    pub cast_shadow: bool,
    /// Light arrives from below the shading normal.
    pub is_transmission: bool,
}

/// Shading point the light is evaluated for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionPoint {
    pub p: Vec3,
    /// Geometric normal used to offset the shadow ray; `None` inside volumes.
    pub ng: Option<Vec3>,
    /// Shading normal used to classify transmission.
    pub n: Option<Vec3>,
    pub time: f32,
}

/// Zero the lobes a light does not illuminate.
fn apply_light_exclusion(eval: &mut BsdfEval, shader: LightShaderFlag) {
    if shader.contains(LightShaderFlag::EXCLUDE_DIFFUSE) {
        eval.diffuse = Vec3::ZERO;
    }
    if shader.contains(LightShaderFlag::EXCLUDE_GLOSSY) {
        eval.glossy = Vec3::ZERO;
    }
    if shader.contains(LightShaderFlag::EXCLUDE_TRANSMIT) {
        eval.transmission = Vec3::ZERO;
    }
    if shader.contains(LightShaderFlag::EXCLUDE_SCATTER) {
        eval.volume = Vec3::ZERO;
    }
}

/// Combine a light sample with the BSDF evaluation towards it.
///
/// `bsdf_eval` and `bsdf_pdf` are the closure (or phase) evaluation for
/// direction `ls.d`. Returns `None` when the sample contributes nothing or
/// is dropped by light-threshold roulette.
pub fn direct_emission(
    kd: &KernelData,
    point: &EmissionPoint,
    ls: &LightSample,
    mut bsdf_eval: BsdfEval,
    bsdf_pdf: f32,
    path_flag: PathRayFlag,
    rand_terminate: f32,
) -> Option<DirectLight> {
    if !(ls.pdf > 0.0) || is_zero(ls.eval) {
        return None;
    }
    if bsdf_eval.is_zero() {
        return None;
    }

    if ls.shader.contains(LightShaderFlag::USE_MIS) && !ls.is_delta {
        bsdf_eval.mul(power_heuristic(ls.pdf, bsdf_pdf));
    }
    bsdf_eval.mul3(ls.eval / ls.pdf);

    apply_light_exclusion(&mut bsdf_eval, ls.shader);
    if bsdf_eval.is_zero() {
        return None;
    }

    if kd.light_inv_rr_threshold > 0.0 && !path_flag.contains(PathRayFlag::SHADOW_CATCHER) {
        let probability = max3(bsdf_eval.sum().abs()) * kd.light_inv_rr_threshold;
        if probability < 1.0 {
            if rand_terminate >= probability {
                return None;
            }
            bsdf_eval.mul(1.0 / probability);
        }
    }

    let origin = match point.ng {
        Some(ng) if ls.d.dot(ng) < 0.0 => ray_offset(point.p, -ng),
        Some(ng) => ray_offset(point.p, ng),
        None => point.p,
    };
    let (d, t) = if ls.t < f32::MAX {
        let to_light = ls.p - origin;
        let dist = to_light.length();
        if !(dist > 0.0) {
            return None;
        }
        (to_light / dist, dist * (1.0 - 1e-4))
    } else {
        (ls.d, f32::MAX)
    };
    let mut ray = Ray::new(origin, d, t);
    ray.time = point.time;

    Some(DirectLight {
        eval: bsdf_eval,
        ray,
        cast_shadow: ls.shader.contains(LightShaderFlag::CAST_SHADOW),
        is_transmission: point.n.is_some_and(|n| ls.d.dot(n) < 0.0),
    })
}

/// Weight of an emitter (lamp or background) hit by a sampled ray.
///
/// `None` when the emitter is excluded for this path type. Otherwise the
/// power heuristic against light sampling, unless the previous bounce was
/// singular or the emitter is not light-sampled.
pub fn emitter_hit_weight(path: &PathData, shader: LightShaderFlag, light_pdf: f32) -> Option<f32> {
    if shader.excludes_path(path.flag) {
        return None;
    }
    if !path.flag.contains(PathRayFlag::MIS_SKIP) && shader.contains(LightShaderFlag::USE_MIS) && light_pdf > 0.0 {
        Some(power_heuristic(path.mis_ray_pdf, light_pdf))
    } else {
        Some(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LightType;
    use crate::kernel::types::LAMP_NONE;
    use crate::settings::Settings;

    fn point_sample(pdf: f32, shader: LightShaderFlag) -> LightSample {
        LightSample {
            p: Vec3::new(0.0, 0.0, 2.0),
            d: Vec3::Z,
            ng: -Vec3::Z,
            t: 2.0,
            eval: Vec3::ONE,
            pdf,
            is_delta: false,
            lamp: LAMP_NONE,
            light_type: LightType::Area,
            shader,
        }
    }

    fn diffuse_eval() -> BsdfEval {
        BsdfEval {
            diffuse: Vec3::splat(0.5),
            glossy: Vec3::splat(0.25),
            ..Default::default()
        }
    }

    fn surface_point() -> EmissionPoint {
        EmissionPoint {
            p: Vec3::ZERO,
            ng: Some(Vec3::Z),
            n: Some(Vec3::Z),
            time: 0.0,
        }
    }

    fn kd_without_roulette() -> KernelData {
        let mut settings = Settings::default();
        settings.integrator.light_threshold = 0.0;
        KernelData::new(&settings)
    }

    #[test]
    fn test_zero_pdf_skips() {
        let kd = kd_without_roulette();
        let ls = point_sample(0.0, LightShaderFlag::USE_MIS);
        let res = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.0);
        assert!(res.is_none());
    }

    #[test]
    fn test_mis_weight_applied() {
        let kd = kd_without_roulette();
        let ls = point_sample(1.0, LightShaderFlag::USE_MIS | LightShaderFlag::CAST_SHADOW);
        let res = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.0).unwrap();
        assert!((res.eval.diffuse.x - 0.25).abs() < 1e-6);
        assert!(res.cast_shadow);
        assert!(!res.is_transmission);
        assert!(res.ray.p.z > 0.0);
        assert!(res.ray.t < 2.0);

        let ls = point_sample(1.0, LightShaderFlag::CAST_SHADOW);
        let res = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.0).unwrap();
        assert!((res.eval.diffuse.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_exclusion_zeroes_lobe() {
        let kd = kd_without_roulette();
        let ls = point_sample(1.0, LightShaderFlag::EXCLUDE_DIFFUSE);
        let res = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.0).unwrap();
        assert_eq!(res.eval.diffuse, Vec3::ZERO);
        assert_eq!(res.eval.glossy, Vec3::splat(0.25));
        assert!(!res.cast_shadow);

        let ls = point_sample(1.0, LightShaderFlag::EXCLUDE_DIFFUSE | LightShaderFlag::EXCLUDE_GLOSSY);
        assert!(direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.0).is_none());
    }

    #[test]
    fn test_light_roulette() {
        let mut settings = Settings::default();
        settings.integrator.light_threshold = 1.5;
        let kd = KernelData::new(&settings);
        let ls = point_sample(1.0, LightShaderFlag::empty());
        // sum = 0.75, p = 0.5
        assert!(direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.7).is_none());
        let kept = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::empty(), 0.2).unwrap();
        assert!((kept.eval.diffuse.x - 1.0).abs() < 1e-5);

        // shadow catchers are never dropped
        let res = direct_emission(&kd, &surface_point(), &ls, diffuse_eval(), 1.0, PathRayFlag::SHADOW_CATCHER, 0.7);
        assert!(res.is_some());
    }

    #[test]
    fn test_emitter_hit_weight() {
        let mut path = PathData {
            flag: PathRayFlag::CAMERA | PathRayFlag::MIS_SKIP,
            mis_ray_pdf: 1.0,
            ..Default::default()
        };
        assert_eq!(emitter_hit_weight(&path, LightShaderFlag::USE_MIS, 1.0), Some(1.0));

        path.flag = PathRayFlag::REFLECT | PathRayFlag::DIFFUSE;
        let w = emitter_hit_weight(&path, LightShaderFlag::USE_MIS, 1.0).unwrap();
        assert!((w - 0.5).abs() < 1e-6);
        assert_eq!(emitter_hit_weight(&path, LightShaderFlag::EXCLUDE_DIFFUSE, 1.0), None);
    }
}
