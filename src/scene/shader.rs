//! Fixed-function surface and volume shaders.

use glam::Vec3;

use crate::device::VolumeCoefficients;
use crate::kernel::closure::{roughness_to_exponent, ClosureType, ShaderData, ShaderDataFlag};
use crate::kernel::types::PathRayFlag;

/// Surface response of a shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceShader {
    Diffuse { color: Vec3 },
    Glossy { color: Vec3, roughness: f32 },
    /// Diffuse base under a glossy coat of weight `specular`.
    Plastic { color: Vec3, roughness: f32, specular: f32 },
    Translucent { color: Vec3 },
    Transparent { color: Vec3 },
    Emission { color: Vec3, strength: f32 },
    Subsurface { color: Vec3, radius: Vec3 },
    /// Black body, ends every path.
    Absorb,
    /// Invisible surface that only bounds a volume.
    VolumeBoundary,
}

/// Homogeneous participating medium.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeShader {
    pub absorption: Vec3,
    pub scattering: Vec3,
    pub emission: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shader {
    pub name: String,
    pub surface: SurfaceShader,
    pub volume: Option<VolumeShader>,
    /// Direct light on this surface skips light roulette.
    pub shadow_catcher: bool,
}

impl Shader {
    pub fn new(name: impl Into<String>, surface: SurfaceShader) -> Self {
        Self {
            name: name.into(),
            surface,
            volume: None,
            shadow_catcher: false,
        }
    }

    pub fn with_volume(mut self, volume: VolumeShader) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_shadow_catcher(mut self, shadow_catcher: bool) -> Self {
        self.shadow_catcher = shadow_catcher;
        self
    }

    /// Shadow rays pass through this surface, attenuated.
    pub fn has_transparent_shadow(&self) -> bool {
        matches!(
            self.surface,
            SurfaceShader::Transparent { .. } | SurfaceShader::VolumeBoundary
        )
    }

    /// Fill the closures and emission of `sd`.
    pub fn eval_surface(&self, sd: &mut ShaderData, _path_flag: PathRayFlag) {
        match self.surface {
            SurfaceShader::Diffuse { color } => sd.add_closure(ClosureType::Diffuse, color),
            SurfaceShader::Glossy { color, roughness } => sd.add_closure(
                ClosureType::Glossy {
                    exponent: roughness_to_exponent(roughness),
                },
                color,
            ),
            SurfaceShader::Plastic {
                color,
                roughness,
                specular,
            } => {
                let specular = specular.clamp(0.0, 1.0);
                sd.add_closure(ClosureType::Diffuse, color * (1.0 - specular));
                sd.add_closure(
                    ClosureType::Glossy {
                        exponent: roughness_to_exponent(roughness),
                    },
                    Vec3::splat(specular),
                );
            }
            SurfaceShader::Translucent { color } => sd.add_closure(ClosureType::Translucent, color),
            SurfaceShader::Transparent { color } => sd.add_closure(ClosureType::Transparent, color),
            SurfaceShader::Emission { color, strength } => sd.add_emission(color * strength),
            SurfaceShader::Subsurface { color, radius } => sd.add_closure(
                ClosureType::Subsurface { radius, roughness: 1.0 },
                color,
            ),
            SurfaceShader::Absorb => {}
            SurfaceShader::VolumeBoundary => sd.add_closure(ClosureType::Transparent, Vec3::ONE),
        }

        if self.volume.is_some() {
            sd.flag |= ShaderDataFlag::HAS_VOLUME;
            sd.volume_shader = sd.shader;
            if self.surface == SurfaceShader::VolumeBoundary {
                sd.flag |= ShaderDataFlag::HAS_ONLY_VOLUME;
            }
        }
        if self.shadow_catcher {
            sd.flag |= ShaderDataFlag::SHADOW_CATCHER;
        }
    }

    pub fn eval_volume(&self) -> VolumeCoefficients {
        self.volume
            .map(|v| VolumeCoefficients {
                sigma_a: v.absorption.max(Vec3::ZERO),
                sigma_s: v.scattering.max(Vec3::ZERO),
                emission: v.emission.max(Vec3::ZERO),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plastic_splits_weight() {
        let shader = Shader::new(
            "plastic",
            SurfaceShader::Plastic {
                color: Vec3::ONE,
                roughness: 0.3,
                specular: 0.25,
            },
        );
        let mut sd = ShaderData::default();
        shader.eval_surface(&mut sd, PathRayFlag::CAMERA);
        assert_eq!(sd.closures.len(), 2);
        assert_eq!(sd.albedo(), Vec3::ONE);
        assert!(sd.flag.contains(ShaderDataFlag::BSDF));
    }

    #[test]
    fn test_volume_boundary_flags() {
        let shader = Shader::new("fog", SurfaceShader::VolumeBoundary).with_volume(VolumeShader {
            scattering: Vec3::splat(0.5),
            ..Default::default()
        });
        let mut sd = ShaderData {
            shader: 3,
            ..Default::default()
        };
        shader.eval_surface(&mut sd, PathRayFlag::CAMERA);
        assert!(sd.flag.contains(ShaderDataFlag::HAS_VOLUME | ShaderDataFlag::HAS_ONLY_VOLUME));
        assert_eq!(sd.volume_shader, 3);
        assert_eq!(sd.transparency(), Vec3::ONE);
        assert!(shader.has_transparent_shadow());
        assert_eq!(shader.eval_volume().sigma_t(), Vec3::splat(0.5));
    }

    #[test]
    fn test_absorb_has_no_closures() {
        let mut sd = ShaderData::default();
        Shader::new("black", SurfaceShader::Absorb).eval_surface(&mut sd, PathRayFlag::CAMERA);
        assert!(sd.is_absorbing());
        assert!(!Shader::new("black", SurfaceShader::Absorb).has_transparent_shadow());
    }
}
