//! # Pathtrace
//!
//! Progressive, multi-device path tracing integrator.
//!
//! Paths are advanced as small state machines by stage kernels (intersect,
//! shade surface, shade volume, shadow, ...). Each device runs a queue that
//! keeps a pool of in-flight paths busy on tiles pulled from a shared
//! scheduler, and every queue adds its samples into one set of pass-strided
//! render buffers.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math helpers
//! - [`kernel`] - Path state and stage kernels
//! - [`device`] - Device abstraction and the CPU reference device
//! - [`scene`] - Triangle scenes, BVH, camera, lights and shaders
//! - [`integrator`] - Buffers, work scheduling, device queues, orchestration
//! - [`settings`] - JSON render settings
//!
//! ## Example
//!
//! ```ignore
//! use pathtrace::prelude::*;
//!
//! let scene = Arc::new(builder.build()?);
//! let device: Arc<dyn Device> = Arc::new(CpuDevice::new(scene, &settings.device, 0));
//! let params = BufferParams::from_settings(320, 240, &settings)?;
//! let mut path_trace = PathTrace::new(vec![device], params, &settings)?;
//! let outcome = path_trace.render_samples(64);
//! ```

pub mod util;
pub mod kernel;
pub mod device;
pub mod scene;
pub mod integrator;
pub mod settings;

pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::device::{CpuDevice, Device};
    pub use crate::integrator::{
        BufferParams, CallbackSet, PassType, PathTrace, RenderBuffersSnapshot, RenderCallbacks, RenderOutcome,
    };
    pub use crate::scene::{Background, Camera, Light, LightKind, Scene, Shader, SurfaceShader, VolumeShader};
    pub use crate::settings::Settings;
    pub use glam::Vec3;
    pub use std::sync::Arc;
}
