//! In-memory scene: triangle meshes with shaders, lights, a background
//! and a camera.
//!
//! Scenes are assembled with [`SceneBuilder`] and immutable afterwards, so
//! a single `Arc<Scene>` can back any number of devices.

mod build;
mod bvh;
mod camera;
mod light;
mod shader;

pub use build::build_bvh;
pub use bvh::{Aabb, Bvh, BvhNode, Triangle, TriangleHit};
pub use camera::Camera;
pub use light::{Background, Light, LightKind};
pub use shader::{Shader, SurfaceShader, VolumeShader};

use std::ops::Range;

use glam::Vec3;
use smallvec::SmallVec;
use tracing::info;

use crate::device::{BackgroundEval, LightSample, ShadowQuery};
use crate::kernel::types::{Intersection, Ray, PRIMITIVE_TRIANGLE};
use crate::util::{Error, Result};

/// A mesh instance in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub name: String,
    pub shader: u32,
    /// Range of the object's triangles in the scene triangle list.
    pub triangles: Range<usize>,
}

#[derive(Debug)]
pub struct Scene {
    camera: Camera,
    shaders: Vec<Shader>,
    objects: Vec<Object>,
    triangles: Vec<Triangle>,
    bvh: Bvh,
    lights: Vec<Light>,
    background: Background,
}

impl Scene {
    pub fn builder(camera: Camera) -> SceneBuilder {
        SceneBuilder::new(camera)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn shaders(&self) -> &[Shader] {
        &self.shaders
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    /// Shader of an object, `None` for unknown objects.
    pub fn object_shader(&self, object: u32) -> Option<(u32, &Shader)> {
        let id = self.objects.get(object as usize)?.shader;
        self.shaders.get(id as usize).map(|s| (id, s))
    }

    fn make_isect(&self, prim: usize, hit: TriangleHit) -> Intersection {
        let tri = &self.triangles[prim];
        Intersection {
            t: hit.t,
            u: hit.u,
            v: hit.v,
            prim: prim as u32,
            object: tri.object,
            prim_type: PRIMITIVE_TRIANGLE,
            ng: tri.normal(),
        }
    }

    pub fn intersect_closest(&self, ray: &Ray) -> Option<Intersection> {
        self.bvh
            .intersect_closest(&self.triangles, ray, |_| true)
            .map(|(prim, hit)| self.make_isect(prim, hit))
    }

    pub fn intersect_local(&self, ray: &Ray, object: u32) -> Option<Intersection> {
        self.bvh
            .intersect_closest(&self.triangles, ray, |t| t.object == object)
            .map(|(prim, hit)| self.make_isect(prim, hit))
    }

    /// Collect transparent hits along a shadow ray, closest first.
    ///
    /// Stops at the first opaque surface. Only the closest `hits.len()`
    /// hits are recorded; the returned count covers all of them.
    pub fn intersect_shadow(&self, ray: &Ray, hits: &mut [Intersection]) -> ShadowQuery {
        let mut found: SmallVec<[(usize, TriangleHit); 8]> = SmallVec::new();
        let mut opaque = false;
        self.bvh.traverse(&self.triangles, ray, |prim, hit| {
            let transparent = self
                .object_shader(self.triangles[prim].object)
                .is_some_and(|(_, s)| s.has_transparent_shadow());
            if transparent {
                found.push((prim, hit));
                ray.t
            } else {
                opaque = true;
                0.0
            }
        });
        if opaque {
            return ShadowQuery {
                opaque: true,
                num_hits: 0,
            };
        }

        found.sort_by(|a, b| a.1.t.total_cmp(&b.1.t));
        for (slot, &(prim, hit)) in hits.iter_mut().zip(found.iter()) {
            *slot = self.make_isect(prim, hit);
        }
        ShadowQuery {
            opaque: false,
            num_hits: found.len(),
        }
    }

    /// Lights picked by light sampling: every lamp, plus the background
    /// when it is light-sampled.
    pub fn num_sampled_lights(&self) -> usize {
        self.lights.len() + self.background.is_sampled() as usize
    }

    fn pick_pdf(&self) -> f32 {
        match self.num_sampled_lights() {
            0 => 0.0,
            n => 1.0 / n as f32,
        }
    }

    pub fn sample_light(&self, p: Vec3, pick: f32, u: f32, v: f32) -> Option<LightSample> {
        let n = self.num_sampled_lights();
        if n == 0 {
            return None;
        }
        let index = ((pick * n as f32) as usize).min(n - 1);
        let mut ls = match self.lights.get(index) {
            Some(light) => light.sample(p, u, v)?,
            None => self.background.sample(p, u, v),
        };
        ls.pdf *= self.pick_pdf();
        ls.lamp = index as u32;
        (ls.pdf > 0.0).then_some(ls)
    }

    /// Closest hittable lamp along `ray`.
    pub fn light_intersect(&self, ray: &Ray) -> Option<(u32, f32)> {
        self.lights
            .iter()
            .enumerate()
            .filter_map(|(i, light)| light.intersect(ray).map(|t| (i as u32, t)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn light_eval(&self, lamp: u32, ray: &Ray, t: f32) -> Option<LightSample> {
        let mut ls = self.lights.get(lamp as usize)?.eval(ray, t)?;
        ls.pdf *= self.pick_pdf();
        ls.lamp = lamp;
        Some(ls)
    }

    pub fn background_eval(&self, _ray: &Ray) -> BackgroundEval {
        self.background.eval(self.pick_pdf())
    }
}

/// Incremental scene construction.
#[derive(Debug)]
pub struct SceneBuilder {
    camera: Camera,
    shaders: Vec<Shader>,
    objects: Vec<Object>,
    triangles: Vec<Triangle>,
    lights: Vec<Light>,
    background: Background,
}

impl SceneBuilder {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            shaders: Vec::new(),
            objects: Vec::new(),
            triangles: Vec::new(),
            lights: Vec::new(),
            background: Background::default(),
        }
    }

    /// Register a shader and return its id.
    pub fn add_shader(&mut self, shader: Shader) -> u32 {
        self.shaders.push(shader);
        (self.shaders.len() - 1) as u32
    }

    /// Add a triangle mesh (counter-clockwise front faces) and return its
    /// object id.
    pub fn add_mesh(&mut self, name: impl Into<String>, shader: u32, vertices: &[Vec3], indices: &[u32]) -> Result<u32> {
        let name = name.into();
        if indices.len() % 3 != 0 {
            return Err(Error::invalid_scene(format!(
                "mesh {name}: index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if shader as usize >= self.shaders.len() {
            return Err(Error::UnknownShader(shader));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(Error::VertexOutOfBounds {
                index: index as usize,
                count: vertices.len(),
            });
        }

        let object = self.objects.len() as u32;
        let start = self.triangles.len();
        self.triangles.extend(indices.chunks_exact(3).map(|tri| Triangle {
            v0: vertices[tri[0] as usize],
            v1: vertices[tri[1] as usize],
            v2: vertices[tri[2] as usize],
            object,
        }));
        self.objects.push(Object {
            name,
            shader,
            triangles: start..self.triangles.len(),
        });
        Ok(object)
    }

    /// Parallelogram facing `axis_u x axis_v`.
    pub fn add_quad(&mut self, name: impl Into<String>, shader: u32, corner: Vec3, axis_u: Vec3, axis_v: Vec3) -> Result<u32> {
        let vertices = [corner, corner + axis_u, corner + axis_u + axis_v, corner + axis_v];
        self.add_mesh(name, shader, &vertices, &[0, 1, 2, 0, 2, 3])
    }

    /// Axis-aligned box with outward-facing triangles.
    pub fn add_box(&mut self, name: impl Into<String>, shader: u32, min: Vec3, max: Vec3) -> Result<u32> {
        let vertices: Vec<Vec3> = (0..8)
            .map(|i| {
                Vec3::new(
                    if i & 1 == 0 { min.x } else { max.x },
                    if i & 2 == 0 { min.y } else { max.y },
                    if i & 4 == 0 { min.z } else { max.z },
                )
            })
            .collect();
        #[rustfmt::skip]
        let indices = [
            0, 2, 3, 0, 3, 1, // -z
            4, 5, 7, 4, 7, 6, // +z
            0, 4, 6, 0, 6, 2, // -x
            1, 3, 7, 1, 7, 5, // +x
            0, 1, 5, 0, 5, 4, // -y
            2, 6, 7, 2, 7, 3, // +y
        ];
        self.add_mesh(name, shader, &vertices, &indices)
    }

    pub fn add_light(&mut self, light: Light) -> u32 {
        self.lights.push(light);
        (self.lights.len() - 1) as u32
    }

    pub fn set_background(&mut self, background: Background) -> &mut Self {
        self.background = background;
        self
    }

    /// Validate and build acceleration structures.
    #[tracing::instrument(skip_all, fields(objects = self.objects.len(), triangles = self.triangles.len()))]
    pub fn build(self) -> Result<Scene> {
        for (i, light) in self.lights.iter().enumerate() {
            if !light.strength.is_finite() || light.strength.min_element() < 0.0 {
                return Err(Error::invalid_scene(format!("light {i} has invalid strength")));
            }
        }
        if !self.background.color.is_finite() || self.background.color.min_element() < 0.0 {
            return Err(Error::invalid_scene("background color must be finite and non-negative"));
        }
        if let Some(tri) = self
            .triangles
            .iter()
            .find(|t| !(t.v0.is_finite() && t.v1.is_finite() && t.v2.is_finite()))
        {
            return Err(Error::invalid_scene(format!("object {} has non-finite vertices", tri.object)));
        }

        let bvh = build_bvh(&self.triangles);
        info!(
            nodes = bvh.nodes.len(),
            lights = self.lights.len(),
            shaders = self.shaders.len(),
            "scene built"
        );

        Ok(Scene {
            camera: self.camera,
            shaders: self.shaders,
            objects: self.objects,
            triangles: self.triangles,
            bvh,
            lights: self.lights,
            background: self.background,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 40.0, 16, 16)
    }

    #[test]
    fn test_add_mesh_errors() {
        let mut builder = Scene::builder(camera());
        let shader = builder.add_shader(Shader::new("white", SurfaceShader::Diffuse { color: Vec3::ONE }));
        let verts = [Vec3::ZERO, Vec3::X, Vec3::Y];

        let err = builder.add_mesh("bad", shader, &verts, &[0, 1, 7]).unwrap_err();
        assert!(matches!(err, Error::VertexOutOfBounds { index: 7, count: 3 }));
        let err = builder.add_mesh("bad", 5, &verts, &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::UnknownShader(5)));
        let err = builder.add_mesh("bad", shader, &verts, &[0, 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidScene(_)));

        assert_eq!(builder.add_mesh("tri", shader, &verts, &[0, 1, 2]).unwrap(), 0);
    }

    #[test]
    fn test_box_faces_outward() {
        let mut builder = Scene::builder(camera());
        let shader = builder.add_shader(Shader::new("white", SurfaceShader::Diffuse { color: Vec3::ONE }));
        builder.add_box("box", shader, Vec3::splat(-1.0), Vec3::ONE).unwrap();
        let scene = builder.build().unwrap();
        assert_eq!(scene.triangles().len(), 12);
        for tri in scene.triangles() {
            let outward = tri.centroid().dot(tri.normal());
            assert!(outward > 0.0, "{tri:?}");
        }

        let hit = scene
            .intersect_closest(&Ray::new(Vec3::new(0.3, -0.4, 5.0), Vec3::NEG_Z, f32::MAX))
            .unwrap();
        assert!((hit.t - 4.0).abs() < 1e-5);
        assert_eq!(hit.ng, Vec3::Z);
    }

    #[test]
    fn test_shadow_query_orders_transparent_hits() {
        let mut builder = Scene::builder(camera());
        let glass = builder.add_shader(Shader::new("glass", SurfaceShader::Transparent { color: Vec3::splat(0.5) }));
        let wall = builder.add_shader(Shader::new("wall", SurfaceShader::Diffuse { color: Vec3::ONE }));
        for z in [0.0, -1.0, -2.0] {
            builder
                .add_quad("pane", glass, Vec3::new(-1.0, -1.0, z), Vec3::X * 2.0, Vec3::Y * 2.0)
                .unwrap();
        }
        builder
            .add_quad("wall", wall, Vec3::new(-1.0, -1.0, -3.0), Vec3::X * 2.0, Vec3::Y * 2.0)
            .unwrap();
        let scene = builder.build().unwrap();

        let mut hits = [Intersection::MISS; 2];
        let ray = Ray::new(Vec3::new(0.3, -0.4, 1.0), Vec3::NEG_Z, 3.5);
        let query = scene.intersect_shadow(&ray, &mut hits);
        assert!(!query.opaque);
        assert_eq!(query.num_hits, 3);
        assert!((hits[0].t - 1.0).abs() < 1e-5);
        assert!((hits[1].t - 2.0).abs() < 1e-5);

        let ray = Ray::new(Vec3::new(0.3, -0.4, 1.0), Vec3::NEG_Z, 10.0);
        assert!(scene.intersect_shadow(&ray, &mut hits).opaque);
    }

    #[test]
    fn test_light_pick_includes_background() {
        let mut builder = Scene::builder(camera());
        builder.add_light(Light::new(
            LightKind::Point {
                position: Vec3::Y,
                radius: 0.0,
            },
            Vec3::ONE,
        ));
        builder.set_background(Background::new(Vec3::splat(0.1)));
        let scene = builder.build().unwrap();
        assert_eq!(scene.num_sampled_lights(), 2);

        let lamp = scene.sample_light(Vec3::ZERO, 0.2, 0.5, 0.5).unwrap();
        assert_eq!(lamp.lamp, 0);
        assert!((lamp.pdf - 0.5).abs() < 1e-6);
        let bg = scene.sample_light(Vec3::ZERO, 0.9, 0.5, 0.5).unwrap();
        assert_eq!(bg.lamp, 1);
        assert_eq!(scene.background_eval(&Ray::default()).pdf, bg.pdf);
    }
}
