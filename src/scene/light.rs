//! Analytic lights and the background.
//!
//! Pdfs returned here are solid angle pdfs for the light alone; the scene
//! multiplies in the light selection probability.

use std::f32::consts::PI;

use glam::Vec3;

use crate::device::{BackgroundEval, LightSample, LightType};
use crate::kernel::types::{LightShaderFlag, Ray, LAMP_NONE};
use crate::util::math::{sample_uniform_cone, sample_uniform_sphere, INV_FOUR_PI};

/// Geometry of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Sphere light; a zero radius makes it a singular point light.
    /// `strength` is the radiant intensity in both cases.
    Point { position: Vec3, radius: f32 },
    /// Light at infinity travelling along `direction`, spread over a cone
    /// of `angle` radians. `strength` is the irradiance it delivers.
    Distant { direction: Vec3, angle: f32 },
    /// One-sided rectangle emitting along `axis_u x axis_v`.
    /// `strength` is the emitted power.
    Area { corner: Vec3, axis_u: Vec3, axis_v: Vec3 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub strength: Vec3,
    pub shader: LightShaderFlag,
}

impl Light {
    pub fn new(kind: LightKind, strength: Vec3) -> Self {
        Self {
            kind,
            strength,
            shader: LightShaderFlag::USE_MIS | LightShaderFlag::CAST_SHADOW,
        }
    }

    pub fn with_shader(mut self, shader: LightShaderFlag) -> Self {
        self.shader = shader;
        self
    }

    pub fn light_type(&self) -> LightType {
        match self.kind {
            LightKind::Point { .. } => LightType::Point,
            LightKind::Distant { .. } => LightType::Distant,
            LightKind::Area { .. } => LightType::Area,
        }
    }

    /// Rays can hit the light surface. Lights without MIS are left to light
    /// sampling alone so their emission is not counted twice.
    pub fn is_hittable(&self) -> bool {
        self.shader.contains(LightShaderFlag::USE_MIS)
            && match self.kind {
                LightKind::Point { radius, .. } => radius > 0.0,
                LightKind::Distant { .. } => false,
                LightKind::Area { .. } => true,
            }
    }

    fn make_sample(&self, p: Vec3, d: Vec3, ng: Vec3, t: f32, eval: Vec3, pdf: f32, is_delta: bool) -> LightSample {
        LightSample {
            p,
            d,
            ng,
            t,
            eval,
            pdf,
            is_delta,
            lamp: LAMP_NONE,
            light_type: self.light_type(),
            shader: self.shader,
        }
    }

    /// Sample a point on the light as seen from `p`.
    pub fn sample(&self, p: Vec3, u: f32, v: f32) -> Option<LightSample> {
        match self.kind {
            LightKind::Point { position, radius } => {
                let to_center = position - p;
                let dist2 = to_center.length_squared();
                if radius <= 0.0 {
                    if !(dist2 > 0.0) {
                        return None;
                    }
                    let dist = dist2.sqrt();
                    let d = to_center / dist;
                    return Some(self.make_sample(position, d, -d, dist, self.strength / dist2, 1.0, true));
                }
                let cos_max = sphere_cos_max(dist2, radius)?;
                let axis = to_center / dist2.sqrt();
                let (d, pdf) = sample_uniform_cone(axis, cos_max, u, v);
                let b = d.dot(to_center);
                let t = b - (b * b - dist2 + radius * radius).max(0.0).sqrt();
                let q = p + d * t;
                let ng = (q - position).normalize_or_zero();
                Some(self.make_sample(q, d, ng, t, sphere_radiance(self.strength, radius), pdf, false))
            }
            LightKind::Distant { direction, angle } => {
                let axis = -direction.normalize_or_zero();
                if angle <= 0.0 {
                    return Some(self.make_sample(p + axis, axis, -axis, f32::MAX, self.strength, 1.0, true));
                }
                let cos_max = (angle * 0.5).cos();
                let (d, pdf) = sample_uniform_cone(axis, cos_max, u, v);
                // Not hittable, so never MIS weighted
                Some(self.make_sample(p + d, d, -d, f32::MAX, self.strength * pdf, pdf, true))
            }
            LightKind::Area { corner, axis_u, axis_v } => {
                let (n, area) = rect_frame(axis_u, axis_v)?;
                let q = corner + axis_u * u + axis_v * v;
                let to_light = q - p;
                let dist2 = to_light.length_squared();
                let dist = dist2.sqrt();
                if !(dist > 0.0) {
                    return None;
                }
                let d = to_light / dist;
                let cos_light = -d.dot(n);
                if cos_light <= 0.0 {
                    return None;
                }
                let pdf = dist2 / (cos_light * area);
                Some(self.make_sample(q, d, n, dist, self.strength / (PI * area), pdf, false))
            }
        }
    }

    /// Distance at which `ray` hits the light surface from the outside.
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        if !self.is_hittable() {
            return None;
        }
        let t = match self.kind {
            LightKind::Point { position, radius } => {
                let oc = ray.p - position;
                let b = oc.dot(ray.d);
                let c = oc.length_squared() - radius * radius;
                if c <= 0.0 {
                    return None;
                }
                let disc = b * b - c;
                if disc < 0.0 {
                    return None;
                }
                -b - disc.sqrt()
            }
            LightKind::Area { corner, axis_u, axis_v } => {
                let (n, _) = rect_frame(axis_u, axis_v)?;
                let denom = ray.d.dot(n);
                if denom >= 0.0 {
                    return None;
                }
                let t = (corner - ray.p).dot(n) / denom;
                let local = ray.p + ray.d * t - corner;
                let s = local.dot(axis_u) / axis_u.length_squared();
                let r = local.dot(axis_v) / axis_v.length_squared();
                if !(0.0..=1.0).contains(&s) || !(0.0..=1.0).contains(&r) {
                    return None;
                }
                t
            }
            LightKind::Distant { .. } => return None,
        };
        (t > 0.0 && t < ray.t).then_some(t)
    }

    /// Emission and pdf for a ray that hit the light at distance `t`.
    pub fn eval(&self, ray: &Ray, t: f32) -> Option<LightSample> {
        let q = ray.at(t);
        match self.kind {
            LightKind::Point { position, radius } if radius > 0.0 => {
                let cos_max = sphere_cos_max((position - ray.p).length_squared(), radius)?;
                let pdf = 1.0 / (2.0 * PI * (1.0 - cos_max));
                let ng = (q - position).normalize_or_zero();
                Some(self.make_sample(q, ray.d, ng, t, sphere_radiance(self.strength, radius), pdf, false))
            }
            LightKind::Area { axis_u, axis_v, .. } => {
                let (n, area) = rect_frame(axis_u, axis_v)?;
                let cos_light = -ray.d.dot(n);
                if cos_light <= 0.0 {
                    return None;
                }
                let pdf = t * t / (cos_light * area);
                Some(self.make_sample(q, ray.d, n, t, self.strength / (PI * area), pdf, false))
            }
            _ => None,
        }
    }
}

/// Cosine of the half angle a sphere subtends, `None` from the inside.
fn sphere_cos_max(dist2: f32, radius: f32) -> Option<f32> {
    let r2 = radius * radius;
    if dist2 <= r2 {
        return None;
    }
    Some((1.0 - r2 / dist2).max(0.0).sqrt().min(1.0 - 1e-7))
}

fn sphere_radiance(intensity: Vec3, radius: f32) -> Vec3 {
    intensity / (PI * radius * radius)
}

/// Unit normal and area of a rectangle light.
fn rect_frame(axis_u: Vec3, axis_v: Vec3) -> Option<(Vec3, f32)> {
    let n = axis_u.cross(axis_v);
    let area = n.length();
    (area > 0.0).then(|| (n / area, area))
}

/// Constant environment radiance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
    pub color: Vec3,
    /// With `USE_MIS` the background is light-sampled.
    pub shader: LightShaderFlag,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            color: Vec3::ZERO,
            shader: LightShaderFlag::USE_MIS | LightShaderFlag::CAST_SHADOW,
        }
    }
}

impl Background {
    pub fn new(color: Vec3) -> Self {
        Self {
            color,
            ..Default::default()
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.shader.contains(LightShaderFlag::USE_MIS) && self.color != Vec3::ZERO
    }

    pub fn sample(&self, p: Vec3, u: f32, v: f32) -> LightSample {
        let d = sample_uniform_sphere(u, v);
        LightSample {
            p: p + d,
            d,
            ng: -d,
            t: f32::MAX,
            eval: self.color,
            pdf: INV_FOUR_PI,
            is_delta: false,
            lamp: LAMP_NONE,
            light_type: LightType::Background,
            shader: self.shader,
        }
    }

    /// `pick_pdf` is the probability of choosing the background among the
    /// sampled lights.
    pub fn eval(&self, pick_pdf: f32) -> BackgroundEval {
        BackgroundEval {
            eval: self.color,
            pdf: if self.is_sampled() { pick_pdf * INV_FOUR_PI } else { 0.0 },
            shader: self.shader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_light_inverse_square() {
        let light = Light::new(
            LightKind::Point {
                position: Vec3::new(0.0, 2.0, 0.0),
                radius: 0.0,
            },
            Vec3::splat(8.0),
        );
        let ls = light.sample(Vec3::ZERO, 0.3, 0.3).unwrap();
        assert!(ls.is_delta);
        assert_eq!(ls.d, Vec3::Y);
        assert_eq!(ls.eval, Vec3::splat(2.0));
        assert!(!light.is_hittable());
    }

    #[test]
    fn test_sphere_light_sample_and_hit_agree() {
        let light = Light::new(
            LightKind::Point {
                position: Vec3::new(0.0, 4.0, 0.0),
                radius: 0.5,
            },
            Vec3::ONE,
        );
        let ls = light.sample(Vec3::ZERO, 0.25, 0.75).unwrap();
        let ray = Ray::new(Vec3::ZERO, ls.d, f32::MAX);
        let t = light.intersect(&ray).unwrap();
        assert!((t - ls.t).abs() < 1e-3);
        let hit = light.eval(&ray, t).unwrap();
        assert!((hit.pdf - ls.pdf).abs() / ls.pdf < 1e-3);
        assert_eq!(hit.eval, ls.eval);

        // No light from the inside
        assert!(light.sample(Vec3::new(0.0, 4.1, 0.0), 0.5, 0.5).is_none());
    }

    #[test]
    fn test_area_light_one_sided() {
        let light = Light::new(
            LightKind::Area {
                corner: Vec3::new(-0.5, 1.0, -0.5),
                axis_u: Vec3::X,
                axis_v: Vec3::Z,
            },
            Vec3::ONE,
        );
        // Emits downwards: x cross z = -y
        let ls = light.sample(Vec3::ZERO, 0.5, 0.5).unwrap();
        assert!((ls.t - 1.0).abs() < 1e-5);
        assert!((ls.pdf - 1.0).abs() < 1e-5);
        assert!(light.sample(Vec3::new(0.0, 2.0, 0.0), 0.5, 0.5).is_none());

        let down = Ray::new(Vec3::ZERO, Vec3::Y, f32::MAX);
        assert_eq!(light.intersect(&down), Some(1.0));
        let up = Ray::new(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, f32::MAX);
        assert!(light.intersect(&up).is_none());
    }

    #[test]
    fn test_background_pdf() {
        let bg = Background::new(Vec3::splat(0.5));
        assert!(bg.is_sampled());
        assert!((bg.eval(0.5).pdf - 0.5 * INV_FOUR_PI).abs() < 1e-7);
        let hidden = Background {
            shader: LightShaderFlag::CAST_SHADOW,
            ..bg
        };
        assert_eq!(hidden.eval(0.5).pdf, 0.0);
    }
}
