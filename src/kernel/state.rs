//! Per-path integrator state.
//!
//! A [`PathState`] holds everything needed to resume one in-flight path
//! between kernel dispatches. States live in a device queue's pool and are
//! reused for many paths; nothing in here allocates.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::types::{DeviceKernel, Intersection, PathRayFlag, Ray, OBJECT_NONE, SHADER_NONE};

/// Capacity of the volume stacks (main and shadow).
pub const VOLUME_STACK_SIZE: usize = 8;

/// Capacity of the shadow intersection array. A shadow ray with more hits
/// is re-cast from the last recorded hit.
pub const SHADOW_ISECT_SIZE: usize = 4;

/// Bounce bookkeeping and radiance carried by the main path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathData {
    /// Pixel index in the render buffer; multiply by the pass stride for an offset.
    pub render_pixel_index: u32,
    /// Sample index; renders are capped at `u16::MAX` samples.
    pub sample: u16,
    pub bounce: u16,
    pub diffuse_bounce: u16,
    pub glossy_bounce: u16,
    pub transmission_bounce: u16,
    pub volume_bounce: u16,
    pub transparent_bounce: u16,
    pub queued_kernel: DeviceKernel,
    pub rng_hash: u32,
    pub rng_offset: u32,
    pub flag: PathRayFlag,
    pub mis_ray_pdf: f32,
    pub mis_ray_t: f32,
    pub min_ray_pdf: f32,
    pub throughput: Vec3,
    pub diffuse_glossy_ratio: Vec3,
    pub denoising_feature_throughput: Vec3,
    pub shader_sort_key: u32,
}

impl Default for PathData {
    fn default() -> Self {
        Self {
            render_pixel_index: 0,
            sample: 0,
            bounce: 0,
            diffuse_bounce: 0,
            glossy_bounce: 0,
            transmission_bounce: 0,
            volume_bounce: 0,
            transparent_bounce: 0,
            queued_kernel: DeviceKernel::None,
            rng_hash: 0,
            rng_offset: 0,
            flag: PathRayFlag::empty(),
            mis_ray_pdf: 0.0,
            mis_ray_t: 0.0,
            min_ray_pdf: f32::MAX,
            throughput: Vec3::ZERO,
            diffuse_glossy_ratio: Vec3::ONE,
            denoising_feature_throughput: Vec3::ZERO,
            shader_sort_key: 0,
        }
    }
}

/// Subsurface closure parameters for the subsurface probe kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SubsurfaceState {
    pub albedo: Vec3,
    pub radius: Vec3,
    pub roughness: f32,
}

/// One volume the path is currently inside of.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VolumeStackEntry {
    pub object: u32,
    pub shader: u32,
}

impl VolumeStackEntry {
    pub const NONE: Self = Self {
        object: OBJECT_NONE,
        shader: SHADER_NONE,
    };
}

/// Fixed-capacity stack of nested volumes.
///
/// When full, entering another volume is ignored: the outer volumes stay
/// recorded and the innermost one is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStack {
    entries: [VolumeStackEntry; VOLUME_STACK_SIZE],
    len: u8,
}

impl Default for VolumeStack {
    fn default() -> Self {
        Self {
            entries: [VolumeStackEntry::NONE; VOLUME_STACK_SIZE],
            len: 0,
        }
    }
}

impl VolumeStack {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn entries(&self) -> &[VolumeStackEntry] {
        &self.entries[..self.len as usize]
    }

    pub fn contains_object(&self, object: u32) -> bool {
        self.entries().iter().any(|e| e.object == object)
    }

    /// Enter a volume. Returns false when the entry was dropped because the
    /// stack is full; entering an object already on the stack is a no-op.
    pub fn enter(&mut self, object: u32, shader: u32) -> bool {
        if self.contains_object(object) {
            return true;
        }
        if self.len as usize >= VOLUME_STACK_SIZE {
            return false;
        }
        self.entries[self.len as usize] = VolumeStackEntry { object, shader };
        self.len += 1;
        true
    }

    /// Leave the volume of `object`, keeping the order of the others.
    pub fn exit(&mut self, object: u32) {
        let len = self.len as usize;
        if let Some(i) = self.entries[..len].iter().position(|e| e.object == object) {
            self.entries.copy_within(i + 1..len, i);
            self.len -= 1;
            self.entries[self.len as usize] = VolumeStackEntry::NONE;
        }
    }
}

/// Occlusion query spawned from the main path for direct lighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowPathData {
    pub bounce: u16,
    pub transparent_bounce: u16,
    pub queued_kernel: DeviceKernel,
    pub flag: PathRayFlag,
    /// Path throughput times light contribution, attenuated while resolving.
    pub throughput: Vec3,
    pub diffuse_glossy_ratio: Vec3,
    /// Hits found by the last cast.
    pub num_hits: u16,
}

impl Default for ShadowPathData {
    fn default() -> Self {
        Self {
            bounce: 0,
            transparent_bounce: 0,
            queued_kernel: DeviceKernel::None,
            flag: PathRayFlag::empty(),
            throughput: Vec3::ZERO,
            diffuse_glossy_ratio: Vec3::ONE,
            num_hits: 0,
        }
    }
}

/// Lifecycle of a shadow sub-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowPhase {
    /// No shadow query in flight.
    Idle,
    /// Ray set up, waiting for intersection.
    Armed,
    /// Hits gathered, waiting for attenuation to be resolved.
    Cast,
}

/// Complete state of one in-flight path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathState {
    pub path: PathData,
    pub ray: Ray,
    pub isect: Intersection,
    pub subsurface: SubsurfaceState,
    pub volume_stack: VolumeStack,
    pub shadow_path: ShadowPathData,
    pub shadow_ray: Ray,
    pub shadow_isect: [Intersection; SHADOW_ISECT_SIZE],
    pub shadow_volume_stack: VolumeStack,
}

impl PathState {
    /// Main path waiting for any kernel.
    #[inline]
    pub fn is_path_active(&self) -> bool {
        self.path.queued_kernel != DeviceKernel::None
    }

    pub fn shadow_phase(&self) -> ShadowPhase {
        match self.shadow_path.queued_kernel {
            DeviceKernel::IntersectShadow => ShadowPhase::Armed,
            DeviceKernel::ShadeShadow => ShadowPhase::Cast,
            _ => ShadowPhase::Idle,
        }
    }

    /// Kernel that must run next for this state. The shadow sub-path always
    /// goes first so it resolves inside the parent path's lifetime.
    #[inline]
    pub fn next_kernel(&self) -> DeviceKernel {
        if self.shadow_path.queued_kernel != DeviceKernel::None {
            self.shadow_path.queued_kernel
        } else {
            self.path.queued_kernel
        }
    }

    /// Neither the path nor its shadow has work left.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.next_kernel() == DeviceKernel::None
    }

    /// Discard any shadow query.
    pub fn clear_shadow(&mut self) {
        self.shadow_path = ShadowPathData::default();
        self.shadow_volume_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_stack_enter_exit() {
        let mut stack = VolumeStack::default();
        assert!(stack.is_empty());
        assert!(stack.enter(1, 10));
        assert!(stack.enter(2, 20));
        assert!(stack.enter(1, 10));
        assert_eq!(stack.len(), 2);

        stack.exit(1);
        assert_eq!(stack.entries(), &[VolumeStackEntry { object: 2, shader: 20 }]);
        stack.exit(5);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_volume_stack_overflow_keeps_outer() {
        let mut stack = VolumeStack::default();
        for i in 0..VOLUME_STACK_SIZE as u32 {
            assert!(stack.enter(i, i));
        }
        assert!(!stack.enter(100, 100));
        assert_eq!(stack.len(), VOLUME_STACK_SIZE);
        assert!(stack.contains_object(0));
        assert!(!stack.contains_object(100));
    }

    #[test]
    fn test_next_kernel_prefers_shadow() {
        let mut state = PathState::default();
        assert!(state.is_done());
        state.path.queued_kernel = DeviceKernel::IntersectClosest;
        assert_eq!(state.next_kernel(), DeviceKernel::IntersectClosest);
        state.shadow_path.queued_kernel = DeviceKernel::IntersectShadow;
        assert_eq!(state.shadow_phase(), ShadowPhase::Armed);
        assert_eq!(state.next_kernel(), DeviceKernel::IntersectShadow);
        state.clear_shadow();
        assert_eq!(state.shadow_phase(), ShadowPhase::Idle);
        assert!(!state.is_done());
    }

    #[test]
    fn test_state_is_compact() {
        // Inline arrays only
        assert!(std::mem::size_of::<PathState>() < 768);
    }
}
