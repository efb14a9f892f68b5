//! Per-path radiance accumulation.
//!
//! Contributions are clamped, split into render pass categories and summed
//! in the lane's [`PathRadiance`]; the film write copies them into the
//! render buffers once the path is done.

use glam::Vec3;

use super::types::PathRayFlag;
use super::KernelData;
use crate::util::math::{average, ensure_finite_nonneg, max3};

/// Radiance gathered by one camera path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathRadiance {
    pub combined: Vec3,
    /// Share of the camera ray that escaped through a transparent film.
    pub transparent: f32,
    pub emission: Vec3,
    pub background: Vec3,
    pub diffuse: Vec3,
    pub glossy: Vec3,
    pub transmission: Vec3,
    pub volume: Vec3,
    pub denoising_albedo: Vec3,
    pub denoising_normal: Vec3,
    /// Distance to the first surface, `None` when the camera ray escaped.
    pub depth: Option<f32>,
}

impl Default for PathRadiance {
    fn default() -> Self {
        Self {
            combined: Vec3::ZERO,
            transparent: 0.0,
            emission: Vec3::ZERO,
            background: Vec3::ZERO,
            diffuse: Vec3::ZERO,
            glossy: Vec3::ZERO,
            transmission: Vec3::ZERO,
            volume: Vec3::ZERO,
            denoising_albedo: Vec3::ZERO,
            denoising_normal: Vec3::ZERO,
            depth: None,
        }
    }
}

/// Pass receiving light seen directly by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectPass {
    Emission,
    Background,
}

/// Clamp a contribution by its largest component.
fn accum_clamp(kd: &KernelData, l: Vec3, bounce: u16) -> Vec3 {
    let l = ensure_finite_nonneg(l);
    let limit = if bounce == 0 {
        kd.integrator.sample_clamp_direct
    } else {
        kd.integrator.sample_clamp_indirect
    };
    let sum = max3(l);
    if limit > 0.0 && sum > limit {
        l * (limit / sum)
    } else {
        l
    }
}

impl PathRadiance {
    /// Split `l` into the category recorded on the path at its first scatter.
    fn add_to_category(&mut self, flag: PathRayFlag, l: Vec3, diffuse_glossy_ratio: Vec3) {
        if flag.contains(PathRayFlag::PASS_DIFFUSE_GLOSSY) {
            let diffuse = l * diffuse_glossy_ratio;
            self.diffuse += diffuse;
            self.glossy += l - diffuse;
        } else if flag.contains(PathRayFlag::PASS_TRANSMISSION) {
            self.transmission += l;
        } else if flag.contains(PathRayFlag::PASS_VOLUME) {
            self.volume += l;
        }
    }

    fn add_emission_or_background(
        &mut self,
        kd: &KernelData,
        flag: PathRayFlag,
        bounce: u16,
        l: Vec3,
        diffuse_glossy_ratio: Vec3,
        pass: DirectPass,
    ) {
        let l = accum_clamp(kd, l, bounce);
        self.combined += l;
        if !flag.contains(PathRayFlag::ANY_PASS) {
            match pass {
                DirectPass::Emission => self.emission += l,
                DirectPass::Background => self.background += l,
            }
        } else {
            self.add_to_category(flag, l, diffuse_glossy_ratio);
        }
    }

    /// Emission from a surface, volume or lamp reached by the main path.
    pub fn accum_emission(&mut self, kd: &KernelData, flag: PathRayFlag, bounce: u16, l: Vec3, ratio: Vec3) {
        self.add_emission_or_background(kd, flag, bounce, l, ratio, DirectPass::Emission);
    }

    /// Environment light reached by an escaping ray.
    pub fn accum_background(&mut self, kd: &KernelData, flag: PathRayFlag, bounce: u16, l: Vec3, ratio: Vec3) {
        self.add_emission_or_background(kd, flag, bounce, l, ratio, DirectPass::Background);
    }

    /// Direct light delivered by a resolved shadow ray.
    pub fn accum_light(&mut self, kd: &KernelData, shadow_flag: PathRayFlag, bounce: u16, l: Vec3, ratio: Vec3) {
        let l = accum_clamp(kd, l, bounce);
        self.combined += l;
        self.add_to_category(shadow_flag, l, ratio);
    }

    /// Camera ray escaped through a transparent film.
    pub fn accum_transparent(&mut self, throughput: Vec3) {
        self.transparent += average(throughput);
    }

    /// Alpha written to the combined pass.
    pub fn alpha(&self) -> f32 {
        (1.0 - self.transparent).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn kd_with_clamp(direct: f32, indirect: f32) -> KernelData {
        let mut settings = Settings::default();
        settings.integrator.sample_clamp_direct = direct;
        settings.integrator.sample_clamp_indirect = indirect;
        KernelData::new(&settings)
    }

    #[test]
    fn test_camera_emission_goes_to_emission_pass() {
        let kd = kd_with_clamp(0.0, 0.0);
        let mut l = PathRadiance::default();
        l.accum_emission(&kd, PathRayFlag::CAMERA, 0, Vec3::splat(3.0), Vec3::ONE);
        assert_eq!(l.combined, Vec3::splat(3.0));
        assert_eq!(l.emission, Vec3::splat(3.0));
        assert_eq!(l.diffuse, Vec3::ZERO);
    }

    #[test]
    fn test_category_split() {
        let kd = kd_with_clamp(0.0, 0.0);
        let mut l = PathRadiance::default();
        let flag = PathRayFlag::ANY_PASS | PathRayFlag::PASS_DIFFUSE_GLOSSY;
        l.accum_light(&kd, flag, 1, Vec3::ONE, Vec3::splat(0.25));
        assert_eq!(l.diffuse, Vec3::splat(0.25));
        assert_eq!(l.glossy, Vec3::splat(0.75));

        l.accum_background(&kd, PathRayFlag::ANY_PASS | PathRayFlag::PASS_TRANSMISSION, 1, Vec3::ONE, Vec3::ONE);
        assert_eq!(l.transmission, Vec3::ONE);
        assert_eq!(l.background, Vec3::ZERO);
        assert_eq!(l.combined, Vec3::splat(2.0));
    }

    #[test]
    fn test_clamp_direct_and_indirect() {
        let kd = kd_with_clamp(1.0, 4.0);
        let mut l = PathRadiance::default();
        l.accum_emission(&kd, PathRayFlag::CAMERA, 0, Vec3::new(10.0, 5.0, 0.0), Vec3::ONE);
        assert!((l.combined - Vec3::new(1.0, 0.5, 0.0)).length() < 1e-6);

        let mut l = PathRadiance::default();
        l.accum_emission(&kd, PathRayFlag::ANY_PASS, 2, Vec3::new(8.0, 2.0, 2.0), Vec3::ONE);
        assert!((l.combined - Vec3::new(4.0, 1.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_nan_is_dropped() {
        let kd = kd_with_clamp(0.0, 0.0);
        let mut l = PathRadiance::default();
        l.accum_emission(&kd, PathRayFlag::CAMERA, 0, Vec3::new(f32::NAN, 1.0, -1.0), Vec3::ONE);
        assert_eq!(l.combined, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_alpha() {
        let mut l = PathRadiance::default();
        assert_eq!(l.alpha(), 1.0);
        l.accum_transparent(Vec3::splat(0.25));
        assert_eq!(l.alpha(), 0.75);
    }
}
