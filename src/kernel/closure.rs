//! Shading point data and BSDF closures.
//!
//! The device fills a [`ShaderData`] with up to [`MAX_CLOSURES`] weighted
//! closures; the kernels evaluate and sample the mixture here.

use std::f32::consts::{FRAC_1_PI, PI};

use bitflags::bitflags;
use glam::Vec3;
use smallvec::SmallVec;

use super::types::{ClosureLabel, Intersection, Ray, SHADER_NONE};
use crate::util::math::{is_zero, make_orthonormals, reflect, sample_cos_hemisphere, INV_FOUR_PI};

/// Closures kept per shading point.
pub const MAX_CLOSURES: usize = 4;

/// Glossy lobes sharper than this count as specular for denoising features.
const DENOISING_SPECULAR_EXPONENT: f32 = 350.0;

/// Closures with a smaller sample weight are dropped.
const CLOSURE_WEIGHT_CUTOFF: f32 = 1e-5;

/// Phong exponent matching a roughness in `[0, 1]`.
pub fn roughness_to_exponent(roughness: f32) -> f32 {
    let r2 = (roughness * roughness).max(1e-4);
    (2.0 / r2 - 2.0).max(1.0)
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderDataFlag: u32 {
        /// Ray hit the back side of the geometric normal.
        const BACKFACING = 1 << 0;
        const EMISSION = 1 << 1;
        const BSDF = 1 << 2;
        const TRANSPARENT = 1 << 3;
        const SUBSURFACE = 1 << 4;
        /// Object carries a volume shader.
        const HAS_VOLUME = 1 << 5;
        /// Surface is only a volume boundary.
        const HAS_ONLY_VOLUME = 1 << 6;
        const SHADOW_CATCHER = 1 << 7;
    }
}

/// Scattering model of a closure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClosureType {
    /// Lambertian reflection.
    Diffuse,
    /// Lambertian transmission to the other side of the surface.
    Translucent,
    /// Normalized Phong lobe around the mirror direction.
    Glossy { exponent: f32 },
    /// Straight pass-through.
    Transparent,
    /// Subsurface entry; the probe kernel picks the exit point.
    Subsurface { radius: Vec3, roughness: f32 },
}

/// One weighted closure of a shading point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderClosure {
    pub ty: ClosureType,
    pub weight: Vec3,
    pub sample_weight: f32,
    pub n: Vec3,
}

impl ShaderClosure {
    fn is_singular(&self) -> bool {
        matches!(self.ty, ClosureType::Transparent | ClosureType::Subsurface { .. })
    }

    fn label(&self) -> ClosureLabel {
        match self.ty {
            ClosureType::Diffuse => ClosureLabel::REFLECT | ClosureLabel::DIFFUSE,
            ClosureType::Translucent => ClosureLabel::TRANSMIT | ClosureLabel::DIFFUSE,
            ClosureType::Glossy { .. } => ClosureLabel::REFLECT | ClosureLabel::GLOSSY,
            ClosureType::Transparent => ClosureLabel::TRANSMIT | ClosureLabel::TRANSPARENT,
            ClosureType::Subsurface { .. } => ClosureLabel::SUBSURFACE | ClosureLabel::DIFFUSE,
        }
    }
}

/// Shading point: geometry of the hit plus the shader's closures.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderData {
    pub p: Vec3,
    /// Shading normal, on the side of the incoming ray.
    pub n: Vec3,
    /// Geometric normal, on the side of the incoming ray.
    pub ng: Vec3,
    /// Unit vector towards the ray origin.
    pub i: Vec3,
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub object: u32,
    pub prim: u32,
    pub shader: u32,
    pub time: f32,
    pub flag: ShaderDataFlag,
    pub closures: SmallVec<[ShaderClosure; MAX_CLOSURES]>,
    pub emission: Vec3,
    pub volume_shader: u32,
}

impl Default for ShaderData {
    fn default() -> Self {
        Self {
            p: Vec3::ZERO,
            n: Vec3::Z,
            ng: Vec3::Z,
            i: Vec3::Z,
            t: 0.0,
            u: 0.0,
            v: 0.0,
            object: 0,
            prim: 0,
            shader: SHADER_NONE,
            time: 0.0,
            flag: ShaderDataFlag::empty(),
            closures: SmallVec::new(),
            emission: Vec3::ZERO,
            volume_shader: SHADER_NONE,
        }
    }
}

impl ShaderData {
    /// Geometry setup for a ray hit. Normals are flipped to face the ray.
    pub fn from_ray(ray: &Ray, isect: &Intersection) -> Self {
        let mut sd = Self {
            p: ray.at(isect.t),
            i: -ray.d,
            t: isect.t,
            u: isect.u,
            v: isect.v,
            object: isect.object,
            prim: isect.prim,
            time: ray.time,
            ..Default::default()
        };
        let ng = isect.ng.normalize_or_zero();
        if ng.dot(ray.d) > 0.0 {
            sd.flag |= ShaderDataFlag::BACKFACING;
            sd.ng = -ng;
        } else {
            sd.ng = ng;
        }
        sd.n = sd.ng;
        sd
    }

    /// Append a closure; weights too small to matter and overflow are dropped.
    pub fn add_closure(&mut self, ty: ClosureType, weight: Vec3) {
        let sample_weight = weight.abs().element_sum() / 3.0;
        if sample_weight < CLOSURE_WEIGHT_CUTOFF || self.closures.len() >= MAX_CLOSURES {
            return;
        }
        self.flag |= match ty {
            ClosureType::Transparent => ShaderDataFlag::TRANSPARENT,
            ClosureType::Subsurface { .. } => ShaderDataFlag::SUBSURFACE | ShaderDataFlag::BSDF,
            _ => ShaderDataFlag::BSDF,
        };
        self.closures.push(ShaderClosure {
            ty,
            weight,
            sample_weight,
            n: self.n,
        });
    }

    /// Add emitted radiance.
    pub fn add_emission(&mut self, radiance: Vec3) {
        if !is_zero(radiance) {
            self.emission += radiance;
            self.flag |= ShaderDataFlag::EMISSION;
        }
    }

    /// Combined weight of the transparent closures.
    pub fn transparency(&self) -> Vec3 {
        self.closures
            .iter()
            .filter(|c| c.ty == ClosureType::Transparent)
            .map(|c| c.weight)
            .sum()
    }

    /// Albedo of the non-transparent closures, for denoising features.
    pub fn albedo(&self) -> Vec3 {
        self.closures
            .iter()
            .filter(|c| c.ty != ClosureType::Transparent)
            .map(|c| c.weight)
            .sum()
    }

    /// Nothing scatters, nothing passes through: the surface absorbs.
    pub fn is_absorbing(&self) -> bool {
        self.closures.is_empty()
    }

    /// Replace all closures by a diffuse one, used at subsurface exits.
    pub fn replace_with_diffuse(&mut self, albedo: Vec3) {
        self.closures.clear();
        self.flag.remove(ShaderDataFlag::TRANSPARENT | ShaderDataFlag::SUBSURFACE | ShaderDataFlag::BSDF);
        self.add_closure(ClosureType::Diffuse, albedo);
    }

    /// Split closures into rough and specular parts for denoising features.
    pub fn denoising_features(&self) -> DenoisingFeatures {
        let mut features = DenoisingFeatures::default();
        let mut normal_weight = 0.0;
        for sc in &self.closures {
            let specular = match sc.ty {
                ClosureType::Transparent => true,
                ClosureType::Glossy { exponent } => exponent > DENOISING_SPECULAR_EXPONENT,
                _ => false,
            };
            if specular {
                features.specular_albedo += sc.weight;
            } else {
                features.albedo += sc.weight;
                features.normal += sc.n * sc.sample_weight;
                normal_weight += sc.sample_weight;
            }
        }
        if normal_weight > 0.0 {
            features.normal = (features.normal / normal_weight).normalize_or_zero();
        }
        features
    }

    /// Widen glossy lobes to at least `roughness`.
    pub fn blur(&mut self, roughness: f32) {
        let max_exponent = roughness_to_exponent(roughness);
        for sc in self.closures.iter_mut() {
            if let ClosureType::Glossy { exponent } = &mut sc.ty {
                *exponent = exponent.min(max_exponent);
            }
        }
    }

    fn sum_sample_weight(&self) -> f32 {
        self.closures.iter().map(|c| c.sample_weight).sum()
    }
}

/// Albedo and normal used as denoising guides.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DenoisingFeatures {
    pub albedo: Vec3,
    pub specular_albedo: Vec3,
    pub normal: Vec3,
}

/// BSDF evaluation split by render pass category.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BsdfEval {
    pub diffuse: Vec3,
    pub glossy: Vec3,
    pub transmission: Vec3,
    pub volume: Vec3,
}

impl BsdfEval {
    pub fn sum(&self) -> Vec3 {
        self.diffuse + self.glossy + self.transmission + self.volume
    }

    pub fn is_zero(&self) -> bool {
        is_zero(self.sum())
    }

    pub fn mul(&mut self, f: f32) {
        self.mul3(Vec3::splat(f));
    }

    pub fn mul3(&mut self, f: Vec3) {
        self.diffuse *= f;
        self.glossy *= f;
        self.transmission *= f;
        self.volume *= f;
    }

    /// Per-channel share of diffuse in the reflection part.
    pub fn diffuse_glossy_ratio(&self) -> Vec3 {
        let total = self.diffuse + self.glossy;
        Vec3::select(total.cmpgt(Vec3::ZERO), self.diffuse / total, Vec3::ONE)
    }

    fn add(&mut self, label: ClosureLabel, value: Vec3) {
        if label.contains(ClosureLabel::VOLUME_SCATTER) {
            self.volume += value;
        } else if label.contains(ClosureLabel::TRANSMIT) {
            self.transmission += value;
        } else if label.contains(ClosureLabel::GLOSSY) {
            self.glossy += value;
        } else {
            self.diffuse += value;
        }
    }
}

/// Result of sampling the closure mixture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BsdfSample {
    pub omega_in: Vec3,
    /// Mixture evaluation for `omega_in` (cosine included).
    pub eval: BsdfEval,
    /// Mixture pdf; for singular closures the discrete selection probability.
    pub pdf: f32,
    pub label: ClosureLabel,
    /// Index of the closure that was sampled.
    pub closure: usize,
}

/// Evaluate a single non-singular closure: `(f * cos, pdf)`.
fn closure_eval(sd: &ShaderData, sc: &ShaderClosure, omega_in: Vec3) -> (Vec3, f32) {
    match sc.ty {
        ClosureType::Diffuse => {
            let cos = sc.n.dot(omega_in);
            if cos > 0.0 {
                (Vec3::splat(cos * FRAC_1_PI), cos * FRAC_1_PI)
            } else {
                (Vec3::ZERO, 0.0)
            }
        }
        ClosureType::Translucent => {
            let cos = -sc.n.dot(omega_in);
            if cos > 0.0 {
                (Vec3::splat(cos * FRAC_1_PI), cos * FRAC_1_PI)
            } else {
                (Vec3::ZERO, 0.0)
            }
        }
        ClosureType::Glossy { exponent } => {
            let cos_n = sc.n.dot(omega_in);
            let r = reflect(sd.i, sc.n);
            let cos_r = r.dot(omega_in);
            if cos_n <= 0.0 || cos_r <= 0.0 {
                return (Vec3::ZERO, 0.0);
            }
            let lobe = cos_r.powf(exponent);
            let pdf = (exponent + 1.0) * 0.5 * FRAC_1_PI * lobe;
            let f = (exponent + 2.0) * 0.5 * FRAC_1_PI * lobe;
            (Vec3::splat(f * cos_n), pdf)
        }
        ClosureType::Transparent | ClosureType::Subsurface { .. } => (Vec3::ZERO, 0.0),
    }
}

/// Sample a direction from a single non-singular closure.
fn closure_sample(sd: &ShaderData, sc: &ShaderClosure, u: f32, v: f32) -> Option<Vec3> {
    match sc.ty {
        ClosureType::Diffuse => Some(sample_cos_hemisphere(sc.n, u, v).0),
        ClosureType::Translucent => Some(sample_cos_hemisphere(-sc.n, u, v).0),
        ClosureType::Glossy { exponent } => {
            let r = reflect(sd.i, sc.n);
            let cos_a = u.powf(1.0 / (exponent + 1.0));
            let sin_a = (1.0 - cos_a * cos_a).max(0.0).sqrt();
            let phi = 2.0 * PI * v;
            let (t, b) = make_orthonormals(r);
            let dir = t * (sin_a * phi.cos()) + b * (sin_a * phi.sin()) + r * cos_a;
            (dir.dot(sc.n) > 0.0).then_some(dir)
        }
        ClosureType::Transparent | ClosureType::Subsurface { .. } => None,
    }
}

/// Evaluate the closure mixture towards `omega_in`.
///
/// Returns the per-category evaluation and the mixture pdf, with the pdf
/// normalized by the total sample weight.
pub fn shader_bsdf_eval(sd: &ShaderData, omega_in: Vec3) -> (BsdfEval, f32) {
    let mut eval = BsdfEval::default();
    let mut pdf = 0.0;
    let sum_weight = sd.sum_sample_weight();
    if sum_weight <= 0.0 {
        return (eval, 0.0);
    }
    for sc in sd.closures.iter().filter(|c| !c.is_singular()) {
        let (f, p) = closure_eval(sd, sc, omega_in);
        if p > 0.0 {
            eval.add(sc.label(), f * sc.weight);
            pdf += p * sc.sample_weight;
        }
    }
    (eval, pdf / sum_weight)
}

/// Pick a closure proportional to its sample weight and sample it.
pub fn shader_bsdf_sample(sd: &ShaderData, pick: f32, u: f32, v: f32) -> Option<BsdfSample> {
    let sum_weight = sd.sum_sample_weight();
    if sum_weight <= 0.0 {
        return None;
    }

    let target = pick * sum_weight;
    let mut acc = 0.0;
    let mut index = sd.closures.len() - 1;
    for (i, sc) in sd.closures.iter().enumerate() {
        acc += sc.sample_weight;
        if target < acc {
            index = i;
            break;
        }
    }
    let sc = &sd.closures[index];

    if sc.is_singular() {
        let mut eval = BsdfEval::default();
        eval.add(sc.label(), sc.weight);
        return Some(BsdfSample {
            omega_in: -sd.i,
            eval,
            pdf: sc.sample_weight / sum_weight,
            label: sc.label(),
            closure: index,
        });
    }

    let omega_in = closure_sample(sd, sc, u, v)?;
    let (eval, pdf) = shader_bsdf_eval(sd, omega_in);
    if pdf <= 0.0 || eval.is_zero() {
        return None;
    }
    Some(BsdfSample {
        omega_in,
        eval,
        pdf,
        label: sc.label(),
        closure: index,
    })
}

/// Isotropic phase function: `(eval, pdf)`.
pub fn volume_phase_eval() -> (BsdfEval, f32) {
    let eval = BsdfEval {
        volume: Vec3::splat(INV_FOUR_PI),
        ..Default::default()
    };
    (eval, INV_FOUR_PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(n: Vec3) -> ShaderData {
        ShaderData {
            n,
            ng: n,
            i: n,
            ..Default::default()
        }
    }

    #[test]
    fn test_diffuse_eval_matches_pdf() {
        let mut sd = surface(Vec3::Z);
        sd.add_closure(ClosureType::Diffuse, Vec3::splat(0.5));
        let dir = Vec3::new(0.3, 0.0, 0.8).normalize();
        let (eval, pdf) = shader_bsdf_eval(&sd, dir);
        assert!((pdf - dir.z * FRAC_1_PI).abs() < 1e-6);
        assert!((eval.diffuse.x - 0.5 * dir.z * FRAC_1_PI).abs() < 1e-6);
        assert_eq!(eval.glossy, Vec3::ZERO);

        let (below, pdf_below) = shader_bsdf_eval(&sd, -dir);
        assert!(below.is_zero());
        assert_eq!(pdf_below, 0.0);
    }

    #[test]
    fn test_sample_weights_pick_closures() {
        let mut sd = surface(Vec3::Z);
        sd.add_closure(ClosureType::Diffuse, Vec3::splat(0.75));
        sd.add_closure(ClosureType::Transparent, Vec3::splat(0.25));
        assert_eq!(sd.transparency(), Vec3::splat(0.25));
        assert_eq!(sd.albedo(), Vec3::splat(0.75));

        let s = shader_bsdf_sample(&sd, 0.9, 0.5, 0.5).unwrap();
        assert!(s.label.contains(ClosureLabel::TRANSPARENT));
        assert_eq!(s.omega_in, -sd.i);
        assert!((s.pdf - 0.25).abs() < 1e-6);

        let s = shader_bsdf_sample(&sd, 0.1, 0.5, 0.5).unwrap();
        assert!(s.label.contains(ClosureLabel::DIFFUSE));
        assert!(s.omega_in.z > 0.0);
        // mixture pdf accounts for the selection probability
        assert!((s.pdf - 0.75 * s.omega_in.z * FRAC_1_PI).abs() < 1e-5);
    }

    #[test]
    fn test_glossy_sample_above_surface() {
        let mut sd = surface(Vec3::Z);
        sd.i = Vec3::new(0.5, 0.0, 0.5).normalize();
        sd.add_closure(ClosureType::Glossy { exponent: 50.0 }, Vec3::ONE);
        for k in 0..32 {
            let u = (k as f32 + 0.5) / 32.0;
            if let Some(s) = shader_bsdf_sample(&sd, 0.0, u, 0.37) {
                assert!(s.omega_in.z > 0.0);
                assert!(s.pdf > 0.0);
                assert!(s.eval.glossy.x > 0.0);
            }
        }
    }

    #[test]
    fn test_closure_cutoff_and_capacity() {
        let mut sd = surface(Vec3::Z);
        sd.add_closure(ClosureType::Diffuse, Vec3::ZERO);
        assert!(sd.is_absorbing());
        for _ in 0..MAX_CLOSURES + 2 {
            sd.add_closure(ClosureType::Diffuse, Vec3::ONE);
        }
        assert_eq!(sd.closures.len(), MAX_CLOSURES);
    }

    #[test]
    fn test_from_ray_flips_backfacing() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z, 10.0);
        let isect = Intersection {
            t: 1.0,
            ng: Vec3::Z,
            prim: 0,
            object: 0,
            ..Intersection::MISS
        };
        let sd = ShaderData::from_ray(&ray, &isect);
        assert!(sd.flag.contains(ShaderDataFlag::BACKFACING));
        assert_eq!(sd.ng, -Vec3::Z);
        assert_eq!(sd.p, Vec3::ZERO);
    }

    #[test]
    fn test_denoising_features() {
        let mut sd = surface(Vec3::Z);
        sd.add_closure(ClosureType::Diffuse, Vec3::splat(0.5));
        sd.add_closure(ClosureType::Glossy { exponent: 1000.0 }, Vec3::splat(0.25));
        let f = sd.denoising_features();
        assert_eq!(f.albedo, Vec3::splat(0.5));
        assert_eq!(f.specular_albedo, Vec3::splat(0.25));
        assert!((f.normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_blur_caps_exponent() {
        let mut sd = surface(Vec3::Z);
        sd.add_closure(ClosureType::Glossy { exponent: 1000.0 }, Vec3::ONE);
        sd.blur(0.5);
        assert_eq!(sd.closures[0].ty, ClosureType::Glossy { exponent: roughness_to_exponent(0.5) });
        assert!((roughness_to_exponent(0.5) - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_diffuse_glossy_ratio() {
        let eval = BsdfEval {
            diffuse: Vec3::new(1.0, 0.0, 0.0),
            glossy: Vec3::new(1.0, 1.0, 0.0),
            ..Default::default()
        };
        let ratio = eval.diffuse_glossy_ratio();
        assert_eq!(ratio, Vec3::new(0.5, 0.0, 1.0));
    }
}
