//! Adaptive sampling: stop sampling pixels whose noise estimate is low.
//!
//! Every odd sample is accumulated twice into the auxiliary pass, which
//! therefore holds an independent estimate `A` of the same mean as the
//! combined pass `I`. Their difference measures the remaining noise.

use tracing::debug;

use super::render_buffers::{PassType, RenderBuffers};
use crate::settings::AdaptiveSettings;

/// Convergence parameters for a render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSampling {
    pub use_adaptive: bool,
    pub threshold: f32,
    pub min_samples: u32,
    pub adaptive_step: u32,
}

impl AdaptiveSampling {
    pub fn new(settings: &AdaptiveSettings) -> Self {
        let threshold = settings.threshold.max(0.0);
        let min_samples = if settings.min_samples == 0 && threshold > 0.0 {
            // 0.1 -> 32, 0.01 -> 64, 0.001 -> 128
            (16.0 / threshold.powf(0.3)).ceil() as u32
        } else {
            settings.min_samples
        };
        Self {
            use_adaptive: settings.enabled && threshold > 0.0,
            threshold,
            min_samples: min_samples.max(4),
            adaptive_step: settings.step.max(1),
        }
    }

    /// A convergence check is due once `samples` samples are complete.
    pub fn need_filter(&self, samples: u32) -> bool {
        self.use_adaptive && samples >= self.min_samples && samples % self.adaptive_step == 0
    }

    /// Mark converged pixels in the auxiliary pass. Pixels already marked
    /// stay converged. Returns the number of pixels still sampled.
    pub fn convergence_check(&self, buffers: &RenderBuffers) -> usize {
        let params = buffers.params();
        let (Some(combined), Some(aux), Some(count)) = (
            params.pass_offset(PassType::Combined),
            params.pass_offset(PassType::AdaptiveAuxBuffer),
            params.pass_offset(PassType::SampleCount),
        ) else {
            return params.num_pixels();
        };

        let mut active = 0;
        for pixel in 0..params.num_pixels() {
            if buffers.get(pixel, aux + 3) != 0.0 {
                continue;
            }
            let n = buffers.get(pixel, count);
            if !(n > 0.0) {
                active += 1;
                continue;
            }
            let inv_n = 1.0 / n;
            let mut difference = 0.0;
            let mut sum = 0.0;
            for c in 0..3 {
                let i = buffers.get(pixel, combined + c);
                difference += (i - buffers.get(pixel, aux + c)).abs();
                sum += i;
            }
            let error = difference * inv_n / (1e-4 + (sum * inv_n).max(0.0).sqrt());
            if error < self.threshold {
                buffers.set(pixel, aux + 3, 1.0);
            } else {
                active += 1;
            }
        }
        debug!(active, pixels = params.num_pixels(), "adaptive convergence check");
        active
    }
}
