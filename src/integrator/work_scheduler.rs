//! On-demand tile scheduling.
//!
//! The big tile is cut into pixel tiles and the requested samples into
//! sample ranges. A work index enumerates `(sample range, tile)` pairs with
//! the sample range as the outer loop, so every range completes before the
//! next one starts in scan order. Devices pull work concurrently through a
//! single atomic counter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::render_buffers::BufferParams;
use crate::settings::SchedulerSettings;

/// A rectangle of pixels and a range of samples, rendered by one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkTile {
    /// Pixel rectangle in buffer coordinates.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub start_sample: u32,
    pub num_samples: u32,
    pub sample_range_index: usize,
    /// Queue the tile was handed to.
    pub device_index: usize,
}

impl WorkTile {
    /// Number of paths in the tile.
    pub fn work_size(&self) -> usize {
        self.width as usize * self.height as usize * self.num_samples as usize
    }
}

/// Pixel tile size and samples per tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
    pub num_samples: u32,
}

fn round_down_pow2(x: u32) -> u32 {
    if x == 0 {
        0
    } else {
        1 << (31 - x.leading_zeros())
    }
}

fn round_up_pow2(x: u32) -> u32 {
    x.max(1).next_power_of_two()
}

/// Tile size that keeps a pool of `max_num_path_states` busy.
///
/// Square power-of-two tiles with as many samples per tile as the pool
/// allows, capped near `sqrt(samples / 2)` so the sample ranges divide the
/// request evenly. A pool that holds the whole request gets the whole
/// image with all samples.
pub fn tile_calculate_best_size(width: u32, height: u32, samples_num: u32, max_num_path_states: usize) -> TileSize {
    let samples_num = samples_num.max(1);
    if max_num_path_states <= 1 {
        return TileSize {
            width: 1,
            height: 1,
            num_samples: 1,
        };
    }

    let num_pixel_samples = width as usize * height as usize * samples_num as usize;
    if max_num_path_states >= num_pixel_samples {
        return TileSize {
            width,
            height,
            num_samples: samples_num,
        };
    }

    let states_per_sample = max_num_path_states / samples_num as usize;
    let side = if states_per_sample > 0 {
        round_down_pow2((states_per_sample as f64).sqrt().round() as u32).max(1)
    } else {
        1
    };

    let num_samples = if samples_num == 1 {
        1
    } else {
        let tile_area = (side * side) as usize;
        let target = round_up_pow2(((samples_num / 2) as f64).sqrt().round() as u32);
        target
            .min(samples_num)
            .min((max_num_path_states / tile_area).min(u32::MAX as usize) as u32)
            .max(1)
    };

    TileSize {
        width: side,
        height: side,
        num_samples,
    }
}

/// Lock-free scheduler of work tiles.
#[derive(Debug)]
pub struct WorkScheduler {
    overrides: SchedulerSettings,
    image_width: u32,
    image_height: u32,
    tile_size: TileSize,
    start_sample: u32,
    samples_num: u32,
    num_tiles_x: usize,
    num_tiles_per_sample_range: usize,
    num_sample_ranges: usize,
    total_work_size: usize,
    next_work_index: AtomicUsize,
    /// Completed tiles per sample range.
    done_tiles: Vec<AtomicUsize>,
    cancelled: AtomicBool,
}

impl WorkScheduler {
    pub fn new(overrides: SchedulerSettings) -> Self {
        Self {
            overrides,
            image_width: 0,
            image_height: 0,
            tile_size: TileSize {
                width: 1,
                height: 1,
                num_samples: 1,
            },
            start_sample: 0,
            samples_num: 0,
            num_tiles_x: 0,
            num_tiles_per_sample_range: 0,
            num_sample_ranges: 0,
            total_work_size: 0,
            next_work_index: AtomicUsize::new(0),
            done_tiles: Vec::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Prepare the schedule for `samples_num` samples starting at
    /// `start_sample` over the whole buffer.
    pub fn reset(&mut self, params: &BufferParams, start_sample: u32, samples_num: u32, max_num_path_states: usize) {
        let (width, height) = (params.width, params.height);
        let auto = tile_calculate_best_size(width, height, samples_num, max_num_path_states);
        let pick = |value: u32, auto: u32, limit: u32| if value > 0 { value.min(limit) } else { auto };
        self.tile_size = TileSize {
            width: pick(self.overrides.tile_width, auto.width, width).max(1),
            height: pick(self.overrides.tile_height, auto.height, height).max(1),
            num_samples: pick(self.overrides.tile_samples, auto.num_samples, samples_num.max(1)).max(1),
        };

        self.image_width = width;
        self.image_height = height;
        self.start_sample = start_sample;
        self.samples_num = samples_num;
        self.num_tiles_x = width.div_ceil(self.tile_size.width) as usize;
        let num_tiles_y = height.div_ceil(self.tile_size.height) as usize;
        self.num_tiles_per_sample_range = self.num_tiles_x * num_tiles_y;
        self.num_sample_ranges = samples_num.div_ceil(self.tile_size.num_samples) as usize;
        self.total_work_size = self.num_tiles_per_sample_range * self.num_sample_ranges;

        self.next_work_index.store(0, Ordering::Relaxed);
        self.done_tiles = (0..self.num_sample_ranges).map(|_| AtomicUsize::new(0)).collect();
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn tile_size(&self) -> TileSize {
        self.tile_size
    }

    /// Total number of tiles of the current schedule.
    pub fn total_work_size(&self) -> usize {
        self.total_work_size
    }

    /// Next tile for `device_index`, `None` when exhausted or cancelled.
    pub fn get_work(&self, device_index: usize) -> Option<WorkTile> {
        if self.is_cancelled() {
            return None;
        }
        let work_index = self.next_work_index.fetch_add(1, Ordering::Relaxed);
        if work_index >= self.total_work_size {
            return None;
        }

        let sample_range_index = work_index / self.num_tiles_per_sample_range;
        let tile_index = work_index % self.num_tiles_per_sample_range;
        let tile_y = (tile_index / self.num_tiles_x) as u32;
        let tile_x = (tile_index % self.num_tiles_x) as u32;

        let x = tile_x * self.tile_size.width;
        let y = tile_y * self.tile_size.height;
        let range_start = sample_range_index as u32 * self.tile_size.num_samples;

        Some(WorkTile {
            x,
            y,
            width: self.tile_size.width.min(self.image_width - x),
            height: self.tile_size.height.min(self.image_height - y),
            start_sample: self.start_sample + range_start,
            num_samples: self.tile_size.num_samples.min(self.samples_num - range_start),
            sample_range_index,
            device_index,
        })
    }

    /// Record a finished tile. Returns the number of samples completed for
    /// the whole frame: the samples of every leading sample range whose
    /// tiles are all done.
    pub fn mark_done(&self, tile: &WorkTile) -> u32 {
        if let Some(done) = self.done_tiles.get(tile.sample_range_index) {
            done.fetch_add(1, Ordering::AcqRel);
        }
        let complete_ranges = self
            .done_tiles
            .iter()
            .take_while(|d| d.load(Ordering::Acquire) >= self.num_tiles_per_sample_range)
            .count() as u32;
        (complete_ranges * self.tile_size.num_samples).min(self.samples_num)
    }

    /// Stop handing out work. Tiles already handed out still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
