//! Pass-strided accumulation buffers.
//!
//! Every pixel owns `pass_stride` consecutive floats; each pass occupies a
//! fixed offset inside that block. Floats are stored as `AtomicU32` bit
//! patterns so any number of device queues can add into the same pixel
//! without locking.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::settings::Settings;
use crate::util::{Error, Result};

/// Kind of data stored in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    /// RGB radiance plus alpha.
    Combined,
    Emission,
    Background,
    Diffuse,
    Glossy,
    Transmission,
    Volume,
    Depth,
    DenoisingNormal,
    DenoisingAlbedo,
    /// Number of samples that reached the pixel.
    SampleCount,
    /// Half-sample estimate (RGB) and convergence flag (A).
    AdaptiveAuxBuffer,
}

impl PassType {
    pub fn num_components(self) -> usize {
        match self {
            PassType::Combined | PassType::AdaptiveAuxBuffer => 4,
            PassType::Depth | PassType::SampleCount => 1,
            _ => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PassType::Combined => "combined",
            PassType::Emission => "emission",
            PassType::Background => "background",
            PassType::Diffuse => "diffuse",
            PassType::Glossy => "glossy",
            PassType::Transmission => "transmission",
            PassType::Volume => "volume",
            PassType::Depth => "depth",
            PassType::DenoisingNormal => "denoising_normal",
            PassType::DenoisingAlbedo => "denoising_albedo",
            PassType::SampleCount => "sample_count",
            PassType::AdaptiveAuxBuffer => "adaptive_aux_buffer",
        }
    }

    /// Light passes scaled by film exposure on read-out.
    fn is_lightgroup(self) -> bool {
        matches!(
            self,
            PassType::Combined
                | PassType::Emission
                | PassType::Background
                | PassType::Diffuse
                | PassType::Glossy
                | PassType::Transmission
                | PassType::Volume
        )
    }
}

/// A pass and its offset inside the per-pixel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPass {
    pub ty: PassType,
    pub offset: usize,
}

/// Size, placement in the full frame and pass layout of a render buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferParams {
    pub width: u32,
    pub height: u32,
    /// Offset of this buffer inside the full frame (border renders).
    pub full_x: u32,
    pub full_y: u32,
    pub full_width: u32,
    pub full_height: u32,
    passes: Vec<BufferPass>,
    pass_stride: usize,
}

impl BufferParams {
    /// Buffer covering a whole `width` x `height` frame.
    ///
    /// The combined pass is required; duplicates are rejected.
    pub fn new(width: u32, height: u32, passes: &[PassType]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidBufferParams(format!("empty size {width}x{height}")));
        }
        if !passes.contains(&PassType::Combined) {
            return Err(Error::InvalidBufferParams("combined pass is required".into()));
        }
        let mut params = Self {
            width,
            height,
            full_x: 0,
            full_y: 0,
            full_width: width,
            full_height: height,
            passes: Vec::with_capacity(passes.len()),
            pass_stride: 0,
        };
        for &ty in passes {
            params.add_pass(ty)?;
        }
        Ok(params)
    }

    /// Passes implied by the film and adaptive settings.
    pub fn from_settings(width: u32, height: u32, settings: &Settings) -> Result<Self> {
        let mut passes = vec![PassType::Combined];
        if settings.film.light_passes {
            passes.extend([
                PassType::Emission,
                PassType::Background,
                PassType::Diffuse,
                PassType::Glossy,
                PassType::Transmission,
                PassType::Volume,
            ]);
        }
        if settings.film.depth_pass {
            passes.push(PassType::Depth);
        }
        if settings.film.denoising_passes {
            passes.extend([PassType::DenoisingNormal, PassType::DenoisingAlbedo]);
        }
        if settings.adaptive.enabled {
            passes.extend([PassType::SampleCount, PassType::AdaptiveAuxBuffer]);
        }
        Self::new(width, height, &passes)
    }

    /// Place the buffer at `(x, y)` inside a larger frame.
    pub fn with_full_frame(mut self, x: u32, y: u32, full_width: u32, full_height: u32) -> Result<Self> {
        let fits = |offset: u32, size: u32, full: u32| offset.checked_add(size).is_some_and(|end| end <= full);
        if !fits(x, self.width, full_width) || !fits(y, self.height, full_height) {
            return Err(Error::InvalidBufferParams(format!(
                "{}x{} at ({x}, {y}) exceeds full frame {full_width}x{full_height}",
                self.width, self.height
            )));
        }
        self.full_x = x;
        self.full_y = y;
        self.full_width = full_width;
        self.full_height = full_height;
        Ok(self)
    }

    /// Append a pass at the end of the per-pixel block.
    pub fn add_pass(&mut self, ty: PassType) -> Result<()> {
        if self.pass_offset(ty).is_some() {
            return Err(Error::InvalidBufferParams(format!("duplicate pass {}", ty.name())));
        }
        self.passes.push(BufferPass {
            ty,
            offset: self.pass_stride,
        });
        self.pass_stride += ty.num_components();
        Ok(())
    }

    pub fn passes(&self) -> &[BufferPass] {
        &self.passes
    }

    pub fn pass_offset(&self, ty: PassType) -> Option<usize> {
        self.passes.iter().find(|p| p.ty == ty).map(|p| p.offset)
    }

    #[inline]
    pub fn pass_stride(&self) -> usize {
        self.pass_stride
    }

    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Shared accumulation target.
pub struct RenderBuffers {
    params: BufferParams,
    data: Vec<AtomicU32>,
}

impl std::fmt::Debug for RenderBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBuffers")
            .field("params", &self.params)
            .field("len", &self.data.len())
            .finish()
    }
}

impl RenderBuffers {
    pub fn new(params: BufferParams) -> Self {
        let len = params.num_pixels() * params.pass_stride();
        let data = (0..len).map(|_| AtomicU32::new(0)).collect();
        Self { params, data }
    }

    pub fn params(&self) -> &BufferParams {
        &self.params
    }

    /// Reset every float to zero. Not meant to race with writers.
    pub fn zero(&self) {
        for cell in &self.data {
            cell.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    fn index(&self, pixel_index: usize, offset: usize) -> usize {
        pixel_index * self.params.pass_stride + offset
    }

    /// Add `values` to consecutive floats starting at `offset` of a pixel.
    pub fn accumulate(&self, pixel_index: usize, offset: usize, values: &[f32]) {
        let base = self.index(pixel_index, offset);
        for (cell, &v) in self.data[base..base + values.len()].iter().zip(values) {
            if v == 0.0 {
                continue;
            }
            let mut current = cell.load(Ordering::Relaxed);
            loop {
                let new = (f32::from_bits(current) + v).to_bits();
                match cell.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
    }

    #[inline]
    pub fn get(&self, pixel_index: usize, offset: usize) -> f32 {
        f32::from_bits(self.data[self.index(pixel_index, offset)].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, pixel_index: usize, offset: usize, value: f32) {
        self.data[self.index(pixel_index, offset)].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Copy the current contents. Tiles still in flight may be partially
    /// included.
    pub fn snapshot(&self, samples: u32) -> RenderBuffersSnapshot {
        RenderBuffersSnapshot {
            params: self.params.clone(),
            samples,
            data: self
                .data
                .iter()
                .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Plain copy of the buffers, handed to progress and write callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBuffersSnapshot {
    params: BufferParams,
    samples: u32,
    data: Vec<f32>,
}

impl RenderBuffersSnapshot {
    pub fn params(&self) -> &BufferParams {
        &self.params
    }

    /// Samples fully completed across the frame when the copy was taken.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Raw accumulated floats, pass-strided.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Raw bytes of the accumulated floats.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Raw accumulated values of one pass at pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32, ty: PassType) -> Option<&[f32]> {
        let offset = self.params.pass_offset(ty)?;
        if x >= self.params.width || y >= self.params.height {
            return None;
        }
        let base = (y as usize * self.params.width as usize + x as usize) * self.params.pass_stride + offset;
        Some(&self.data[base..base + ty.num_components()])
    }

    /// Per-pixel averaged values of a pass, row-major.
    ///
    /// Values are divided by the pixel's sample count when the buffer has a
    /// sample count pass, by [`samples`](Self::samples) otherwise. Light
    /// passes are scaled by `exposure`; the counting passes are returned raw.
    pub fn get_pass_rect(&self, ty: PassType, exposure: f32) -> Option<Vec<f32>> {
        let offset = self.params.pass_offset(ty)?;
        let stride = self.params.pass_stride;
        let count_offset = self.params.pass_offset(PassType::SampleCount);
        let components = ty.num_components();
        let raw = matches!(ty, PassType::SampleCount | PassType::AdaptiveAuxBuffer);

        let mut out = Vec::with_capacity(self.params.num_pixels() * components);
        for pixel in self.data.chunks_exact(stride) {
            let values = &pixel[offset..offset + components];
            if raw {
                out.extend_from_slice(values);
                continue;
            }
            let n = match count_offset {
                Some(c) => pixel[c],
                None => self.samples as f32,
            };
            let inv = if n > 0.0 { 1.0 / n } else { 0.0 };
            for (i, &v) in values.iter().enumerate() {
                let scale = if ty.is_lightgroup() && i < 3 { exposure } else { 1.0 };
                out.push(v * inv * scale);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_layout() {
        let params = BufferParams::new(4, 2, &[PassType::Combined, PassType::Depth, PassType::Diffuse]).unwrap();
        assert_eq!(params.pass_stride(), 8);
        assert_eq!(params.pass_offset(PassType::Combined), Some(0));
        assert_eq!(params.pass_offset(PassType::Depth), Some(4));
        assert_eq!(params.pass_offset(PassType::Diffuse), Some(5));
        assert_eq!(params.pass_offset(PassType::Glossy), None);
        assert_eq!(params.num_pixels(), 8);
    }

    #[test]
    fn test_invalid_params() {
        assert!(BufferParams::new(0, 2, &[PassType::Combined]).is_err());
        assert!(BufferParams::new(2, 2, &[PassType::Depth]).is_err());
        assert!(BufferParams::new(2, 2, &[PassType::Combined, PassType::Combined]).is_err());
        let params = BufferParams::new(4, 4, &[PassType::Combined]).unwrap();
        assert!(params.clone().with_full_frame(2, 2, 8, 8).is_ok());
        assert!(params.clone().with_full_frame(6, 0, 8, 8).is_err());
        // Offsets near the top of the range must not wrap around
        assert!(params.clone().with_full_frame(u32::MAX - 1, 0, 8, 8).is_err());
        assert!(params.with_full_frame(0, u32::MAX, u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_concurrent_accumulate() {
        let params = BufferParams::new(2, 1, &[PassType::Combined]).unwrap();
        let buffers = Arc::new(RenderBuffers::new(params));
        std::thread::scope(|s| {
            for _ in 0..4 {
                let buffers = &buffers;
                s.spawn(move || {
                    for _ in 0..1000 {
                        buffers.accumulate(1, 0, &[1.0, 0.5, 0.0, 1.0]);
                    }
                });
            }
        });
        assert_eq!(buffers.get(1, 0), 4000.0);
        assert_eq!(buffers.get(1, 1), 2000.0);
        assert_eq!(buffers.get(0, 0), 0.0);

        buffers.zero();
        assert_eq!(buffers.get(1, 0), 0.0);
    }

    #[test]
    fn test_pass_rect_normalization() {
        let params = BufferParams::new(2, 1, &[PassType::Combined, PassType::SampleCount]).unwrap();
        let buffers = RenderBuffers::new(params);
        buffers.accumulate(0, 0, &[4.0, 2.0, 0.0, 4.0]);
        buffers.accumulate(0, 4, &[4.0]);
        buffers.accumulate(1, 0, &[1.0, 1.0, 1.0, 1.0]);
        buffers.accumulate(1, 4, &[1.0]);

        let snapshot = buffers.snapshot(4);
        let rect = snapshot.get_pass_rect(PassType::Combined, 2.0).unwrap();
        assert_eq!(rect, vec![2.0, 1.0, 0.0, 1.0, 2.0, 2.0, 2.0, 1.0]);
        assert_eq!(snapshot.get_pass_rect(PassType::SampleCount, 1.0).unwrap(), vec![4.0, 1.0]);
        assert!(snapshot.get_pass_rect(PassType::Depth, 1.0).is_none());
        assert_eq!(snapshot.pixel(1, 0, PassType::SampleCount), Some(&[1.0][..]));
        assert_eq!(snapshot.as_bytes().len(), 10 * 4);
    }

    #[test]
    fn test_pass_rect_without_count_uses_samples() {
        let params = BufferParams::new(1, 1, &[PassType::Combined]).unwrap();
        let buffers = RenderBuffers::new(params);
        buffers.accumulate(0, 0, &[8.0, 8.0, 8.0, 4.0]);
        let rect = buffers.snapshot(4).get_pass_rect(PassType::Combined, 1.0).unwrap();
        assert_eq!(rect, vec![2.0, 2.0, 2.0, 1.0]);
    }
}
