//! Per-device wavefront execution.
//!
//! A queue owns a pool of lanes sized to the device's path-state capacity.
//! For each tile it keeps the pool filled with camera paths and repeatedly
//! launches the kernel most lanes are waiting for, until every path of the
//! tile has been written to the film.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use super::render_buffers::RenderBuffers;
use super::work_scheduler::{WorkScheduler, WorkTile};
use crate::device::Device;
use crate::kernel::film::film_write;
use crate::kernel::{init_from_camera, run_kernel, DeviceKernel, KernelData, KernelGlobals, Lane};
use crate::util::{Error, Result};

/// Counters of a queue, summed over the tiles it rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub tiles: usize,
    pub paths: u64,
    /// Launches per kernel, indexed by `DeviceKernel::index`.
    pub kernel_launches: [u64; DeviceKernel::NUM],
    pub volume_stack_overflows: u64,
    pub subsurface_misses: u64,
}

impl QueueStats {
    pub fn merge(&mut self, other: &QueueStats) {
        self.tiles += other.tiles;
        self.paths += other.paths;
        for (a, b) in self.kernel_launches.iter_mut().zip(other.kernel_launches) {
            *a += b;
        }
        self.volume_stack_overflows += other.volume_stack_overflows;
        self.subsurface_misses += other.subsurface_misses;
    }

    pub fn launches(&self, kernel: DeviceKernel) -> u64 {
        kernel.index().map_or(0, |i| self.kernel_launches[i])
    }
}

/// Kernel to launch next: shadow kernels first so armed shadows resolve
/// before their parents move on, then the kernel with the most lanes.
fn select_kernel(counts: &[usize; DeviceKernel::NUM]) -> Option<DeviceKernel> {
    let best = |shadow_only: bool| {
        DeviceKernel::ALL
            .iter()
            .zip(counts)
            .filter(|(k, &n)| n > 0 && (!shadow_only || k.is_shadow()))
            .fold(None, |best: Option<(DeviceKernel, usize)>, (&k, &n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((k, n)),
            })
            .map(|(k, _)| k)
    };
    best(true).or_else(|| best(false))
}

/// Execution queue of one device.
pub struct DeviceQueue {
    index: usize,
    device: Arc<dyn Device>,
    lanes: Vec<Lane>,
    sort_by_shader: bool,
    stats: QueueStats,
}

impl std::fmt::Debug for DeviceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceQueue")
            .field("index", &self.index)
            .field("device", &self.device.info().name)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl DeviceQueue {
    pub fn new(index: usize, device: Arc<dyn Device>, sort_by_shader: bool) -> Result<Self> {
        let info = device.info();
        if info.max_num_path_states == 0 {
            return Err(Error::NoPathStates {
                name: info.name.clone(),
            });
        }
        let lanes = vec![Lane::default(); info.max_num_path_states];
        Ok(Self {
            index,
            device,
            lanes,
            sort_by_shader,
            stats: QueueStats::default(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn max_num_path_states(&self) -> usize {
        self.lanes.len()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = QueueStats::default();
    }

    /// Pull tiles until the scheduler runs dry, rendering each one fully
    /// and reporting it through `on_done`.
    #[tracing::instrument(skip_all, fields(device = self.index))]
    pub fn render_samples_full_pipeline(
        &mut self,
        kd: &KernelData,
        scheduler: &WorkScheduler,
        buffers: &RenderBuffers,
        on_done: &(dyn Fn(&WorkTile) + Sync),
    ) {
        while let Some(tile) = scheduler.get_work(self.index) {
            self.render_tile(kd, buffers, &tile);
            self.stats.tiles += 1;
            on_done(&tile);
        }
    }

    /// Run every path of `tile` to completion.
    pub fn render_tile(&mut self, kd: &KernelData, buffers: &RenderBuffers, tile: &WorkTile) {
        let kg = KernelGlobals {
            device: self.device.as_ref(),
            data: kd,
            buffers,
        };
        let parallel = self.device.info().parallel_lanes;
        let work_size = tile.work_size();
        let mut next_work = 0usize;
        let mut launches = 0usize;

        loop {
            // Fill idle lanes with new camera paths
            for lane in self.lanes.iter_mut().filter(|l| !l.active) {
                while next_work < work_size {
                    let work = next_work;
                    next_work += 1;
                    let pixel = work / tile.num_samples as usize;
                    let x = tile.x + (pixel % tile.width as usize) as u32;
                    let y = tile.y + (pixel / tile.width as usize) as u32;
                    let sample = tile.start_sample + (work % tile.num_samples as usize) as u32;
                    if init_from_camera(&kg, lane, x, y, sample) {
                        self.stats.paths += 1;
                        break;
                    }
                }
                if next_work >= work_size {
                    break;
                }
            }

            let mut counts = [0usize; DeviceKernel::NUM];
            for lane in &self.lanes {
                if let Some(i) = lane.next_kernel().index() {
                    counts[i] += 1;
                }
            }
            let Some(kernel) = select_kernel(&counts) else {
                break;
            };
            if let Some(i) = kernel.index() {
                self.stats.kernel_launches[i] += 1;
            }
            launches += 1;

            if self.sort_by_shader && kernel == DeviceKernel::ShadeSurface {
                self.lanes
                    .sort_by_key(|l| (l.next_kernel() != kernel, l.state.path.shader_sort_key));
            }

            let launch = |lane: &mut Lane| {
                if lane.next_kernel() == kernel {
                    run_kernel(&kg, kernel, lane);
                }
            };
            if parallel {
                self.lanes.par_iter_mut().for_each(launch);
            } else {
                self.lanes.iter_mut().for_each(launch);
            }

            // Finished paths go to the film and free their lane
            for lane in self.lanes.iter_mut().filter(|l| l.active && l.state.is_done()) {
                film_write(buffers, &lane.state.path, &lane.radiance);
                self.stats.volume_stack_overflows += lane.stats.volume_stack_overflows as u64;
                self.stats.subsurface_misses += lane.stats.subsurface_misses as u64;
                lane.stats = Default::default();
                lane.active = false;
            }
        }

        debug!(
            device = self.index,
            x = tile.x,
            y = tile.y,
            width = tile.width,
            height = tile.height,
            start_sample = tile.start_sample,
            num_samples = tile.num_samples,
            launches,
            "tile done"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_kernel_prefers_shadow() {
        let mut counts = [0usize; DeviceKernel::NUM];
        assert_eq!(select_kernel(&counts), None);

        let idx = |k: DeviceKernel| k.index().unwrap();
        counts[idx(DeviceKernel::ShadeSurface)] = 100;
        counts[idx(DeviceKernel::IntersectClosest)] = 40;
        assert_eq!(select_kernel(&counts), Some(DeviceKernel::ShadeSurface));

        counts[idx(DeviceKernel::IntersectShadow)] = 1;
        assert_eq!(select_kernel(&counts), Some(DeviceKernel::IntersectShadow));
        counts[idx(DeviceKernel::ShadeShadow)] = 3;
        assert_eq!(select_kernel(&counts), Some(DeviceKernel::ShadeShadow));
    }

    #[test]
    fn test_merge_stats() {
        let mut a = QueueStats {
            tiles: 1,
            paths: 10,
            ..Default::default()
        };
        let mut b = a;
        b.kernel_launches[0] = 4;
        a.merge(&b);
        assert_eq!(a.tiles, 2);
        assert_eq!(a.paths, 20);
        assert_eq!(a.kernel_launches[0], 4);
    }
}
