//! Multi-device render orchestration.
//!
//! [`PathTrace`] owns one [`DeviceQueue`] per device, a shared
//! [`WorkScheduler`] and the render buffers. Every queue runs on its own
//! thread pulling tiles until the schedule is exhausted or cancelled;
//! tile completion is serialized through one lock that advances the
//! completed sample count, runs adaptive convergence checks and fires
//! throttled progress callbacks.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::adaptive_sampling::AdaptiveSampling;
use super::callbacks::{NoCallbacks, RenderCallbacks};
use super::device_queue::{DeviceQueue, QueueStats};
use super::render_buffers::{BufferParams, PassType, RenderBuffers, RenderBuffersSnapshot};
use super::work_scheduler::{WorkScheduler, WorkTile};
use crate::device::Device;
use crate::kernel::KernelData;
use crate::settings::{Settings, MAX_SAMPLES};
use crate::util::{Error, Result};

/// Progress of the current render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStatus {
    /// Samples completed for every pixel of the frame.
    pub rendered_samples_num: u32,
}

/// Throttle state of progress callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStatus {
    pub has_update: bool,
    pub last_update_time: Option<Instant>,
}

impl UpdateStatus {
    /// Whether a progress update is due at `now`. The first update of a
    /// render always fires; later ones wait for `interval`.
    pub fn update_if_needed(&mut self, interval: Duration, now: Instant) -> bool {
        if let (true, Some(last)) = (self.has_update, self.last_update_time) {
            if now.saturating_duration_since(last) < interval {
                return false;
            }
        }
        self.has_update = true;
        self.last_update_time = Some(now);
        true
    }
}

/// Result of [`PathTrace::render_samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub rendered_samples_num: u32,
    pub requested_samples_num: u32,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub stats: QueueStats,
}

/// State guarded by the completion lock.
#[derive(Debug, Default)]
struct Completion {
    rendered: u32,
    last_filtered: u32,
    update: UpdateStatus,
}

/// Renders samples across all devices into one set of buffers.
pub struct PathTrace {
    queues: Vec<DeviceQueue>,
    buffers: RenderBuffers,
    scheduler: WorkScheduler,
    kernel_data: KernelData,
    adaptive: AdaptiveSampling,
    update_interval: Duration,
    callbacks: Box<dyn RenderCallbacks>,
    render_status: RenderStatus,
    update_status: UpdateStatus,
}

impl std::fmt::Debug for PathTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTrace")
            .field("queues", &self.queues)
            .field("buffers", &self.buffers)
            .field("render_status", &self.render_status)
            .finish()
    }
}

impl PathTrace {
    /// Set up queues for `devices` rendering into a buffer described by
    /// `buffer_params`. Adaptive sampling adds its passes when missing.
    pub fn new(devices: Vec<Arc<dyn Device>>, buffer_params: BufferParams, settings: &Settings) -> Result<Self> {
        settings.validate()?;
        if devices.is_empty() {
            return Err(Error::NoDevices);
        }

        let adaptive = AdaptiveSampling::new(&settings.adaptive);
        let mut params = buffer_params;
        if adaptive.use_adaptive {
            for ty in [PassType::SampleCount, PassType::AdaptiveAuxBuffer] {
                if params.pass_offset(ty).is_none() {
                    params.add_pass(ty)?;
                }
            }
        }

        let queues = devices
            .into_iter()
            .enumerate()
            .map(|(index, device)| DeviceQueue::new(index, device, settings.device.sort_by_shader))
            .collect::<Result<Vec<_>>>()?;

        let mut kernel_data = KernelData::new(settings);
        kernel_data.adaptive.enabled = adaptive.use_adaptive;

        debug!(
            devices = queues.len(),
            width = params.width,
            height = params.height,
            pass_stride = params.pass_stride(),
            "path trace created"
        );

        Ok(Self {
            queues,
            buffers: RenderBuffers::new(params),
            scheduler: WorkScheduler::new(settings.scheduler.clone()),
            kernel_data,
            adaptive,
            update_interval: Duration::try_from_secs_f64(settings.session.update_interval_in_seconds.max(0.0))
                .unwrap_or(Duration::MAX),
            callbacks: Box::new(NoCallbacks),
            render_status: RenderStatus::default(),
            update_status: UpdateStatus::default(),
        })
    }

    pub fn set_callbacks(&mut self, callbacks: impl RenderCallbacks + 'static) {
        self.callbacks = Box::new(callbacks);
    }

    pub fn buffers(&self) -> &RenderBuffers {
        &self.buffers
    }

    pub fn buffer_params(&self) -> &BufferParams {
        self.buffers.params()
    }

    pub fn kernel_data(&self) -> &KernelData {
        &self.kernel_data
    }

    pub fn adaptive_sampling(&self) -> &AdaptiveSampling {
        &self.adaptive
    }

    pub fn num_devices(&self) -> usize {
        self.queues.len()
    }

    pub fn render_status(&self) -> RenderStatus {
        self.render_status
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.update_status
    }

    /// Copy of the buffers with the current sample count.
    pub fn snapshot(&self) -> RenderBuffersSnapshot {
        self.buffers.snapshot(self.render_status.rendered_samples_num)
    }

    /// Render `samples_num` samples per pixel from scratch.
    ///
    /// Blocks until every device is done or the cancel callback fired.
    /// The write callback receives the final buffers exactly once.
    /// Requests above [`MAX_SAMPLES`] are clamped.
    #[tracing::instrument(skip(self), fields(devices = self.queues.len()))]
    pub fn render_samples(&mut self, samples_num: u32) -> RenderOutcome {
        let start = Instant::now();
        if samples_num > MAX_SAMPLES {
            warn!(requested = samples_num, max = MAX_SAMPLES, "sample count clamped");
        }
        let samples_num = samples_num.min(MAX_SAMPLES);
        self.render_status = RenderStatus::default();
        self.update_status = UpdateStatus::default();
        self.buffers.zero();

        let max_num_path_states = self
            .queues
            .iter()
            .map(DeviceQueue::max_num_path_states)
            .min()
            .unwrap_or(1);
        self.scheduler
            .reset(self.buffers.params(), 0, samples_num, max_num_path_states);
        for queue in &mut self.queues {
            queue.reset_stats();
        }

        let tile = self.scheduler.tile_size();
        info!(
            samples = samples_num,
            tiles = self.scheduler.total_work_size(),
            tile_width = tile.width,
            tile_height = tile.height,
            tile_samples = tile.num_samples,
            "render start"
        );

        let completion = Mutex::new(Completion::default());
        {
            let Self {
                queues,
                buffers,
                scheduler,
                kernel_data,
                adaptive,
                update_interval,
                callbacks,
                ..
            } = self;
            let buffers = &*buffers;
            let scheduler = &*scheduler;
            let kernel_data = &*kernel_data;
            let adaptive = &*adaptive;
            let callbacks: &dyn RenderCallbacks = &**callbacks;
            let update_interval = *update_interval;

            let on_done = |tile: &WorkTile| {
                let mut done = completion.lock();
                let samples = scheduler.mark_done(tile);
                done.rendered = done.rendered.max(samples);
                let rendered = done.rendered;

                if callbacks.poll_cancel() && !scheduler.is_cancelled() {
                    info!(rendered, "render cancelled");
                    scheduler.cancel();
                }

                if rendered > done.last_filtered && rendered < samples_num && adaptive.need_filter(rendered) {
                    done.last_filtered = rendered;
                    adaptive.convergence_check(buffers);
                }

                if callbacks.wants_progress() && done.update.update_if_needed(update_interval, Instant::now()) {
                    callbacks.on_progress(&buffers.snapshot(rendered), rendered);
                }
            };
            let on_done = &on_done;

            std::thread::scope(|scope| {
                for queue in queues.iter_mut() {
                    scope.spawn(move || {
                        queue.render_samples_full_pipeline(kernel_data, scheduler, buffers, on_done);
                    });
                }
            });
        }

        let completion = completion.into_inner();
        self.render_status.rendered_samples_num = completion.rendered;
        self.update_status = completion.update;
        self.write();

        let mut stats = QueueStats::default();
        for queue in &self.queues {
            stats.merge(queue.stats());
        }
        if stats.volume_stack_overflows > 0 {
            warn!(count = stats.volume_stack_overflows, "volume stack overflow");
        }

        let outcome = RenderOutcome {
            rendered_samples_num: completion.rendered,
            requested_samples_num: samples_num,
            cancelled: self.scheduler.is_cancelled(),
            elapsed: start.elapsed(),
            stats,
        };
        info!(
            rendered = outcome.rendered_samples_num,
            cancelled = outcome.cancelled,
            paths = outcome.stats.paths,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "render finished"
        );
        outcome
    }

    fn write(&self) {
        if self.callbacks.wants_write() {
            let rendered = self.render_status.rendered_samples_num;
            self.callbacks.on_write(&self.buffers.snapshot(rendered), rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_throttle() {
        let interval = Duration::from_secs(10);
        let t0 = Instant::now();
        let mut status = UpdateStatus::default();
        assert!(status.update_if_needed(interval, t0));
        assert!(!status.update_if_needed(interval, t0 + Duration::from_secs(5)));
        assert!(status.update_if_needed(interval, t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_zero_interval_always_updates() {
        let t0 = Instant::now();
        let mut status = UpdateStatus::default();
        assert!(status.update_if_needed(Duration::ZERO, t0));
        assert!(status.update_if_needed(Duration::ZERO, t0));
    }

    #[test]
    fn test_requires_devices() {
        let params = BufferParams::new(4, 4, &[PassType::Combined]).unwrap();
        let err = PathTrace::new(Vec::new(), params, &Settings::default()).unwrap_err();
        assert!(matches!(err, Error::NoDevices));
    }
}
