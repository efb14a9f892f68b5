//! Pinhole / thin-lens perspective camera.

use glam::{Vec2, Vec3};

use crate::kernel::types::Ray;
use crate::util::math::sample_uniform_disk;

/// Perspective camera looking down its local -Z.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    tan_half_fov: f32,
    width: u32,
    height: u32,
    /// Lens radius, zero for a pinhole.
    pub aperture_size: f32,
    pub focal_distance: f32,
    pub clip_start: f32,
    pub clip_end: f32,
}

impl Camera {
    /// Camera at `eye` looking at `target` with a vertical field of view in degrees.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_deg: f32, width: u32, height: u32) -> Self {
        let forward = (target - eye).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(up).normalize_or(Vec3::X);
        let up = right.cross(forward);
        Self {
            position: eye,
            forward,
            right,
            up,
            tan_half_fov: (fov_deg.to_radians() * 0.5).tan(),
            width: width.max(1),
            height: height.max(1),
            aperture_size: 0.0,
            focal_distance: (target - eye).length(),
            clip_start: 0.0,
            clip_end: f32::MAX,
        }
    }

    pub fn with_aperture(mut self, aperture_size: f32, focal_distance: f32) -> Self {
        self.aperture_size = aperture_size.max(0.0);
        self.focal_distance = focal_distance.max(1e-4);
        self
    }

    pub fn with_clip(mut self, clip_start: f32, clip_end: f32) -> Self {
        self.clip_start = clip_start.max(0.0);
        self.clip_end = clip_end.max(self.clip_start);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Ray through a raster position (pixels, y down).
    ///
    /// `lens` samples the aperture; `time` is stored on the ray.
    pub fn generate_ray(&self, raster: Vec2, lens: (f32, f32), time: f32) -> Option<Ray> {
        let aspect = self.width as f32 / self.height as f32;
        let sx = (2.0 * raster.x / self.width as f32 - 1.0) * self.tan_half_fov * aspect;
        let sy = (1.0 - 2.0 * raster.y / self.height as f32) * self.tan_half_fov;
        let dir = (self.forward + self.right * sx + self.up * sy).normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }

        let (origin, dir) = if self.aperture_size > 0.0 {
            let disk = sample_uniform_disk(lens.0, lens.1) * self.aperture_size;
            let focus = self.position + dir * (self.focal_distance / dir.dot(self.forward));
            let origin = self.position + self.right * disk.x + self.up * disk.y;
            (origin, (focus - origin).normalize_or_zero())
        } else {
            (self.position, dir)
        };
        if dir == Vec3::ZERO {
            return None;
        }

        let clip_scale = 1.0 / dir.dot(self.forward).max(1e-6);
        let start = self.clip_start * clip_scale;
        let t = if self.clip_end < f32::MAX {
            (self.clip_end * clip_scale - start).max(0.0)
        } else {
            f32::MAX
        };
        Some(Ray {
            p: origin + dir * start,
            d: dir,
            t,
            time,
            dp: 0.0,
            dd: 2.0 * self.tan_half_fov / self.height as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_looks_at_target() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 40.0, 64, 32);
        let ray = cam.generate_ray(Vec2::new(32.0, 16.0), (0.5, 0.5), 0.0).unwrap();
        assert!((ray.d - Vec3::NEG_Z).length() < 1e-5);
        assert_eq!(ray.p, Vec3::new(0.0, 0.0, 5.0));

        // Raster y grows downwards
        let top = cam.generate_ray(Vec2::new(32.0, 0.0), (0.5, 0.5), 0.0).unwrap();
        assert!(top.d.y > 0.0);
        let left = cam.generate_ray(Vec2::new(0.0, 16.0), (0.5, 0.5), 0.0).unwrap();
        assert!(left.d.x < 0.0);
    }

    #[test]
    fn test_thin_lens_converges_at_focus() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 40.0, 32, 32)
            .with_aperture(0.5, 5.0);
        for lens in [(0.1, 0.2), (0.9, 0.7), (0.4, 0.95)] {
            let ray = cam.generate_ray(Vec2::new(16.0, 16.0), lens, 0.0).unwrap();
            let t = (ray.p.z - 0.0) / -ray.d.z;
            assert!(ray.at(t).truncate().length() < 1e-4);
        }
    }

    #[test]
    fn test_clipping() {
        let cam = Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 40.0, 8, 8).with_clip(1.0, 3.0);
        let ray = cam.generate_ray(Vec2::new(4.0, 4.0), (0.5, 0.5), 0.0).unwrap();
        assert!((ray.p.z + 1.0).abs() < 1e-5);
        assert!((ray.t - 2.0).abs() < 1e-5);
    }
}
