//! Scene/device boundary.
//!
//! The integrator only talks to scene data through the [`Device`] trait:
//! ray queries, shader evaluation, light sampling and volume attenuation.
//! Everything behind it is read-only for the duration of a render, so one
//! device (or several devices sharing the same scene) can be queried from
//! many threads without synchronization.
//!
//! [`CpuDevice`] is the reference implementation over an in-memory
//! [`Scene`](crate::scene::Scene).

mod cpu;

pub use cpu::CpuDevice;

use glam::Vec3;

use crate::kernel::closure::ShaderData;
use crate::kernel::state::VolumeStack;
use crate::kernel::types::{Intersection, LightShaderFlag, PathRayFlag, Ray};
use crate::scene::Camera;

/// Static description of a compute device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human readable name used in logs.
    pub name: String,
    /// Number of path states the device keeps in flight.
    pub max_num_path_states: usize,
    /// Run each kernel across the lanes in parallel.
    pub parallel_lanes: bool,
}

/// Kind of light a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point,
    Distant,
    Area,
    Background,
}

/// A sampled or intersected point on a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    /// Position on the light (unused for distant and background lights).
    pub p: Vec3,
    /// Unit direction from the shading point towards the light.
    pub d: Vec3,
    /// Light surface normal.
    pub ng: Vec3,
    /// Distance to the light, `f32::MAX` for lights at infinity.
    pub t: f32,
    /// Emitted radiance towards the shading point.
    pub eval: Vec3,
    /// Solid angle pdf, light selection included.
    pub pdf: f32,
    /// Singular light that BSDF sampling can never hit.
    pub is_delta: bool,
    pub lamp: u32,
    pub light_type: LightType,
    pub shader: LightShaderFlag,
}

/// Background radiance seen along an escaping ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundEval {
    pub eval: Vec3,
    /// Pdf with which light sampling picks this direction; zero when the
    /// background is not light-sampled.
    pub pdf: f32,
    pub shader: LightShaderFlag,
}

/// Homogeneous volume coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeCoefficients {
    pub sigma_a: Vec3,
    pub sigma_s: Vec3,
    pub emission: Vec3,
}

impl VolumeCoefficients {
    #[inline]
    pub fn sigma_t(&self) -> Vec3 {
        self.sigma_a + self.sigma_s
    }

    /// Sum of the coefficients of every volume on the stack.
    pub fn from_stack(device: &(impl Device + ?Sized), stack: &VolumeStack) -> Self {
        stack
            .entries()
            .iter()
            .map(|e| device.shader_eval_volume(e.shader))
            .fold(Self::default(), |acc, c| Self {
                sigma_a: acc.sigma_a + c.sigma_a,
                sigma_s: acc.sigma_s + c.sigma_s,
                emission: acc.emission + c.emission,
            })
    }
}

/// Outcome of a shadow ray query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowQuery {
    /// An opaque surface blocks the ray.
    pub opaque: bool,
    /// Number of transparent hits along the ray; may exceed the capacity of
    /// the hit array, in which case only the closest ones were recorded.
    pub num_hits: usize,
}

/// Compute device consumed by the integrator.
pub trait Device: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    fn camera(&self) -> &Camera;

    /// Closest surface hit within `ray.t`.
    fn intersect_closest(&self, ray: &Ray) -> Option<Intersection>;

    /// Gather transparent hits up to `ray.t`, closest first, into `hits`.
    fn intersect_shadow(&self, ray: &Ray, hits: &mut [Intersection]) -> ShadowQuery;

    /// Closest hit on a single object, used by the subsurface probe.
    fn intersect_local(&self, ray: &Ray, object: u32) -> Option<Intersection>;

    /// Fill closures, emission and flags of a shading point.
    fn shader_eval_surface(&self, sd: &mut ShaderData, path_flag: PathRayFlag);

    /// Coefficients of a volume shader.
    fn shader_eval_volume(&self, shader: u32) -> VolumeCoefficients;

    /// Number of lights that can be sampled.
    fn num_lights(&self) -> usize;

    /// Pick a light and a point on it as seen from `p`. `None` when there
    /// are no lights or the sample has zero pdf.
    fn light_sample(&self, p: Vec3, pick: f32, u: f32, v: f32) -> Option<LightSample>;

    /// Closest light surface hit by `ray`, as `(lamp, t)`.
    fn light_intersect(&self, ray: &Ray) -> Option<(u32, f32)>;

    /// Emission and pdf of a light hit at distance `t` along `ray`.
    fn light_eval(&self, lamp: u32, ray: &Ray, t: f32) -> Option<LightSample>;

    /// Radiance of the environment along an escaping ray.
    fn background_eval(&self, ray: &Ray) -> BackgroundEval;

    /// Transmittance through the volumes of `stack` over the ray segment.
    fn volume_shadow(&self, ray: &Ray, stack: &VolumeStack) -> Vec3 {
        if stack.is_empty() || !ray.t.is_finite() {
            return Vec3::ONE;
        }
        let coeffs = VolumeCoefficients::from_stack(self, stack);
        (-coeffs.sigma_t() * ray.t).exp()
    }
}
