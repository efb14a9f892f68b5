//! Path tracing kernels.
//!
//! Every in-flight path is a small state machine ([`PathState`]) advanced by
//! stage kernels. A device queue keeps a pool of [`Lane`]s and repeatedly
//! dispatches the stage most lanes are waiting for; [`run_kernel`] is the
//! single entry point for that dispatch.
//!
//! Kernels only touch their own lane and read-only data behind
//! [`KernelGlobals`]. Radiance is gathered per lane in [`PathRadiance`] and
//! written to the render buffers once the lane finishes.

pub mod accumulate;
pub mod closure;
pub mod emission;
pub mod film;
pub mod path_state;
pub mod rng;
pub mod state;
pub mod types;

mod init_from_camera;
mod intersect;
mod shade_background;
mod shade_light;
mod shade_shadow;
mod shade_surface;
mod shade_volume;
mod subsurface;

pub use accumulate::PathRadiance;
pub use init_from_camera::init_from_camera;
pub use state::PathState;
pub use types::DeviceKernel;

use crate::device::Device;
use crate::integrator::render_buffers::RenderBuffers;
use crate::settings::{AdaptiveSettings, FilmSettings, IntegratorSettings, Settings};

/// Integrator constants shared by all kernels of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelData {
    pub integrator: IntegratorSettings,
    pub film: FilmSettings,
    pub adaptive: AdaptiveSettings,
    /// `1 / light_threshold`, zero disables light roulette.
    pub light_inv_rr_threshold: f32,
}

impl KernelData {
    pub fn new(settings: &Settings) -> Self {
        let threshold = settings.integrator.light_threshold;
        Self {
            integrator: settings.integrator.clone(),
            film: settings.film.clone(),
            adaptive: settings.adaptive.clone(),
            light_inv_rr_threshold: if threshold > 0.0 { 1.0 / threshold } else { 0.0 },
        }
    }
}

impl Default for KernelData {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

/// Read-only context handed to every kernel.
#[derive(Clone, Copy)]
pub struct KernelGlobals<'a> {
    pub device: &'a dyn Device,
    pub data: &'a KernelData,
    pub buffers: &'a RenderBuffers,
}

/// Counters a lane bumps while it runs; summed into the queue stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub volume_stack_overflows: u32,
    pub subsurface_misses: u32,
}

/// One slot of a device queue's path-state pool.
#[derive(Debug, Clone, Default)]
pub struct Lane {
    pub state: PathState,
    pub radiance: PathRadiance,
    pub stats: LaneStats,
    /// A path occupies the lane and has not been written to the film yet.
    pub active: bool,
}

impl Lane {
    /// Kernel this lane waits for, `None` when idle or finished.
    #[inline]
    pub fn next_kernel(&self) -> DeviceKernel {
        if self.active {
            self.state.next_kernel()
        } else {
            DeviceKernel::None
        }
    }
}

/// Run one stage kernel on a lane.
pub fn run_kernel(kg: &KernelGlobals, kernel: DeviceKernel, lane: &mut Lane) {
    match kernel {
        DeviceKernel::None => {}
        DeviceKernel::IntersectClosest => intersect::intersect_closest(kg, lane),
        DeviceKernel::IntersectShadow => intersect::intersect_shadow(kg, lane),
        DeviceKernel::IntersectSubsurface => subsurface::intersect_subsurface(kg, lane),
        DeviceKernel::ShadeBackground => shade_background::shade_background(kg, lane),
        DeviceKernel::ShadeLight => shade_light::shade_light(kg, lane),
        DeviceKernel::ShadeSurface => shade_surface::shade_surface(kg, lane),
        DeviceKernel::ShadeVolume => shade_volume::shade_volume(kg, lane),
        DeviceKernel::ShadeShadow => shade_shadow::shade_shadow(kg, lane),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_threshold_inverse() {
        let mut settings = Settings::default();
        settings.integrator.light_threshold = 0.05;
        let kd = KernelData::new(&settings);
        assert!((kd.light_inv_rr_threshold - 20.0).abs() < 1e-4);

        settings.integrator.light_threshold = 0.0;
        assert_eq!(KernelData::new(&settings).light_inv_rr_threshold, 0.0);
    }

    #[test]
    fn test_idle_lane_has_no_kernel() {
        let mut lane = Lane::default();
        lane.state.path.queued_kernel = DeviceKernel::IntersectClosest;
        assert_eq!(lane.next_kernel(), DeviceKernel::None);
        lane.active = true;
        assert_eq!(lane.next_kernel(), DeviceKernel::IntersectClosest);
    }
}
