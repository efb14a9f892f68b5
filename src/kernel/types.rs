//! Ray, intersection and flag types shared by all kernels.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Sentinel for "no primitive" / "no object" / "no shader".
pub const PRIM_NONE: u32 = u32::MAX;
pub const OBJECT_NONE: u32 = u32::MAX;
pub const SHADER_NONE: u32 = u32::MAX;
pub const LAMP_NONE: u32 = u32::MAX;

/// Primitive type stored in [`Intersection::prim_type`].
pub const PRIMITIVE_NONE: u32 = 0;
pub const PRIMITIVE_TRIANGLE: u32 = 1;
pub const PRIMITIVE_LAMP: u32 = 2;

/// Ray with scalar differentials.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Ray {
    /// Origin.
    pub p: Vec3,
    /// Unit direction.
    pub d: Vec3,
    /// Maximum distance.
    pub t: f32,
    /// Shutter time in `[0, 1]`.
    pub time: f32,
    /// Origin differential.
    pub dp: f32,
    /// Direction differential.
    pub dd: f32,
}

impl Ray {
    pub fn new(p: Vec3, d: Vec3, t: f32) -> Self {
        Self {
            p,
            d,
            t,
            time: 0.0,
            dp: 0.0,
            dd: 0.0,
        }
    }

    /// Point at distance `t` along the ray.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.p + self.d * t
    }
}

impl Default for Ray {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Result of a scene intersection.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Intersection {
    pub t: f32,
    /// Barycentric coordinates.
    pub u: f32,
    pub v: f32,
    /// Primitive index, or lamp index for `PRIMITIVE_LAMP`.
    pub prim: u32,
    pub object: u32,
    pub prim_type: u32,
    /// Geometric normal, not flipped towards the ray.
    pub ng: Vec3,
}

impl Intersection {
    /// Intersection record meaning "nothing was hit".
    pub const MISS: Self = Self {
        t: f32::INFINITY,
        u: 0.0,
        v: 0.0,
        prim: PRIM_NONE,
        object: OBJECT_NONE,
        prim_type: PRIMITIVE_NONE,
        ng: Vec3::ZERO,
    };

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.prim != PRIM_NONE
    }

    #[inline]
    pub fn is_lamp(&self) -> bool {
        self.prim_type == PRIMITIVE_LAMP
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::MISS
    }
}

bitflags! {
    /// Classification of the ray a path is currently travelling along.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PathRayFlag: u32 {
        const CAMERA = 1 << 0;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SINGULAR = 1 << 5;
        const TRANSPARENT = 1 << 6;
        const VOLUME_SCATTER = 1 << 7;
        const SHADOW = 1 << 8;
        const EMISSION = 1 << 9;
        /// Skip MIS weighting for the next emitter hit.
        const MIS_SKIP = 1 << 10;
        /// Direct light is not roulette-terminated for shadow catchers.
        const SHADOW_CATCHER = 1 << 11;
        /// Exit point of a subsurface probe, shade as diffuse.
        const SUBSURFACE = 1 << 12;
        /// Camera ray still passing only through transparent surfaces.
        const TRANSPARENT_BACKGROUND = 1 << 13;
        /// Denoising features are still being gathered.
        const DENOISING_FEATURES = 1 << 14;
        /// Set once the first scattering event happened.
        const ANY_PASS = 1 << 15;
        /// Pass category chosen at the first scattering event.
        const PASS_DIFFUSE_GLOSSY = 1 << 16;
        const PASS_TRANSMISSION = 1 << 17;
        const PASS_VOLUME = 1 << 18;
        /// Path terminates once the current kernel finishes.
        const TERMINATE = 1 << 19;

        const REFLECT_DIFFUSE_GLOSSY = Self::DIFFUSE.bits() | Self::GLOSSY.bits();
        const PASS_ANY_CATEGORY = Self::PASS_DIFFUSE_GLOSSY.bits()
            | Self::PASS_TRANSMISSION.bits()
            | Self::PASS_VOLUME.bits();
        /// Bits describing the ray type, rewritten at every bounce.
        const RAY_TYPE = Self::CAMERA.bits()
            | Self::REFLECT.bits()
            | Self::TRANSMIT.bits()
            | Self::DIFFUSE.bits()
            | Self::GLOSSY.bits()
            | Self::SINGULAR.bits()
            | Self::TRANSPARENT.bits()
            | Self::VOLUME_SCATTER.bits();
    }
}

bitflags! {
    /// Light visibility options, carried by every light sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LightShaderFlag: u32 {
        const USE_MIS = 1 << 0;
        const CAST_SHADOW = 1 << 1;
        const EXCLUDE_DIFFUSE = 1 << 2;
        const EXCLUDE_GLOSSY = 1 << 3;
        const EXCLUDE_TRANSMIT = 1 << 4;
        const EXCLUDE_SCATTER = 1 << 5;

        const EXCLUDE_ANY = Self::EXCLUDE_DIFFUSE.bits()
            | Self::EXCLUDE_GLOSSY.bits()
            | Self::EXCLUDE_TRANSMIT.bits()
            | Self::EXCLUDE_SCATTER.bits();
    }
}

impl LightShaderFlag {
    /// Whether an emitter hit by a path of type `path_flag` is excluded.
    pub fn excludes_path(self, path_flag: PathRayFlag) -> bool {
        if !self.intersects(Self::EXCLUDE_ANY) {
            return false;
        }
        (self.contains(Self::EXCLUDE_DIFFUSE) && path_flag.contains(PathRayFlag::DIFFUSE))
            || (self.contains(Self::EXCLUDE_GLOSSY)
                && path_flag.contains(PathRayFlag::GLOSSY | PathRayFlag::REFLECT))
            || (self.contains(Self::EXCLUDE_TRANSMIT) && path_flag.contains(PathRayFlag::TRANSMIT))
            || (self.contains(Self::EXCLUDE_SCATTER)
                && path_flag.contains(PathRayFlag::VOLUME_SCATTER))
    }
}

bitflags! {
    /// What kind of scattering a sampled closure produced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClosureLabel: u32 {
        const TRANSMIT = 1 << 0;
        const REFLECT = 1 << 1;
        const DIFFUSE = 1 << 2;
        const GLOSSY = 1 << 3;
        const SINGULAR = 1 << 4;
        const TRANSPARENT = 1 << 5;
        const VOLUME_SCATTER = 1 << 6;
        const SUBSURFACE = 1 << 7;
    }
}

/// Kernel stage a path (or shadow path) waits for.
///
/// Between two dispatches exactly one stage is queued per state machine;
/// `None` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKernel {
    #[default]
    None,
    IntersectClosest,
    IntersectShadow,
    IntersectSubsurface,
    ShadeBackground,
    ShadeLight,
    ShadeSurface,
    ShadeVolume,
    ShadeShadow,
}

impl DeviceKernel {
    /// All schedulable stages, in dispatch priority order for ties.
    pub const ALL: [DeviceKernel; 8] = [
        DeviceKernel::IntersectShadow,
        DeviceKernel::ShadeShadow,
        DeviceKernel::IntersectClosest,
        DeviceKernel::ShadeVolume,
        DeviceKernel::ShadeSurface,
        DeviceKernel::IntersectSubsurface,
        DeviceKernel::ShadeLight,
        DeviceKernel::ShadeBackground,
    ];

    /// Number of entries in [`DeviceKernel::ALL`].
    pub const NUM: usize = Self::ALL.len();

    /// Slot of this stage in [`DeviceKernel::ALL`]; `None` has no slot.
    pub fn index(self) -> Option<usize> {
        Self::ALL.iter().position(|&k| k == self)
    }

    /// Shadow kernels operate on the shadow sub-state.
    pub fn is_shadow(self) -> bool {
        matches!(self, DeviceKernel::IntersectShadow | DeviceKernel::ShadeShadow)
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKernel::None => "none",
            DeviceKernel::IntersectClosest => "intersect_closest",
            DeviceKernel::IntersectShadow => "intersect_shadow",
            DeviceKernel::IntersectSubsurface => "intersect_subsurface",
            DeviceKernel::ShadeBackground => "shade_background",
            DeviceKernel::ShadeLight => "shade_light",
            DeviceKernel::ShadeSurface => "shade_surface",
            DeviceKernel::ShadeVolume => "shade_volume",
            DeviceKernel::ShadeShadow => "shade_shadow",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_layout() {
        assert_eq!(std::mem::size_of::<Ray>(), 40);
        let r = Ray::new(Vec3::ZERO, Vec3::X, 10.0);
        assert_eq!(r.at(2.0), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_intersection_miss() {
        let isect = Intersection::default();
        assert!(!isect.is_hit());
        assert!(!isect.is_lamp());
        let zeroed = Intersection::zeroed();
        assert_eq!(zeroed.prim, 0);
    }

    #[test]
    fn test_light_exclusion() {
        let flags = LightShaderFlag::EXCLUDE_DIFFUSE;
        assert!(flags.excludes_path(PathRayFlag::DIFFUSE | PathRayFlag::REFLECT));
        assert!(!flags.excludes_path(PathRayFlag::GLOSSY | PathRayFlag::REFLECT));
        assert!(!LightShaderFlag::USE_MIS.excludes_path(PathRayFlag::DIFFUSE));

        let glossy = LightShaderFlag::EXCLUDE_GLOSSY;
        assert!(glossy.excludes_path(PathRayFlag::GLOSSY | PathRayFlag::REFLECT));
        assert!(!glossy.excludes_path(PathRayFlag::GLOSSY | PathRayFlag::TRANSMIT));
    }

    #[test]
    fn test_kernel_index() {
        assert_eq!(DeviceKernel::None.index(), None);
        for (i, k) in DeviceKernel::ALL.iter().enumerate() {
            assert_eq!(k.index(), Some(i));
        }
        assert!(DeviceKernel::ShadeShadow.is_shadow());
        assert!(!DeviceKernel::ShadeSurface.is_shadow());
    }
}
