use std::sync::Arc;

use glam::Vec3;

use super::{BackgroundEval, Device, DeviceInfo, LightSample, ShadowQuery, VolumeCoefficients};
use crate::kernel::closure::ShaderData;
use crate::kernel::types::{Intersection, PathRayFlag, Ray};
use crate::scene::{Camera, Scene};
use crate::settings::DeviceSettings;

/// Device that answers every query from a shared in-memory scene.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    info: DeviceInfo,
    scene: Arc<Scene>,
}

impl CpuDevice {
    pub fn new(scene: Arc<Scene>, settings: &DeviceSettings, index: usize) -> Self {
        Self {
            info: DeviceInfo {
                name: format!("CPU{index}"),
                max_num_path_states: settings.max_num_path_states,
                parallel_lanes: settings.parallel_lanes,
            },
            scene,
        }
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }
}

impl Device for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn camera(&self) -> &Camera {
        self.scene.camera()
    }

    fn intersect_closest(&self, ray: &Ray) -> Option<Intersection> {
        self.scene.intersect_closest(ray)
    }

    fn intersect_shadow(&self, ray: &Ray, hits: &mut [Intersection]) -> ShadowQuery {
        self.scene.intersect_shadow(ray, hits)
    }

    fn intersect_local(&self, ray: &Ray, object: u32) -> Option<Intersection> {
        self.scene.intersect_local(ray, object)
    }

    fn shader_eval_surface(&self, sd: &mut ShaderData, path_flag: PathRayFlag) {
        if let Some((id, shader)) = self.scene.object_shader(sd.object) {
            sd.shader = id;
            shader.eval_surface(sd, path_flag);
        }
    }

    fn shader_eval_volume(&self, shader: u32) -> VolumeCoefficients {
        self.scene
            .shaders()
            .get(shader as usize)
            .map(|s| s.eval_volume())
            .unwrap_or_default()
    }

    fn num_lights(&self) -> usize {
        self.scene.num_sampled_lights()
    }

    fn light_sample(&self, p: Vec3, pick: f32, u: f32, v: f32) -> Option<LightSample> {
        self.scene.sample_light(p, pick, u, v)
    }

    fn light_intersect(&self, ray: &Ray) -> Option<(u32, f32)> {
        self.scene.light_intersect(ray)
    }

    fn light_eval(&self, lamp: u32, ray: &Ray, t: f32) -> Option<LightSample> {
        self.scene.light_eval(lamp, ray, t)
    }

    fn background_eval(&self, ray: &Ray) -> BackgroundEval {
        self.scene.background_eval(ray)
    }
}
