//! Film write: copy a finished path's radiance into the render buffers.

use super::accumulate::PathRadiance;
use super::state::PathData;
use crate::integrator::render_buffers::{PassType, RenderBuffers};

#[inline]
fn write_pass(buffers: &RenderBuffers, pixel: usize, ty: PassType, values: &[f32]) {
    if let Some(offset) = buffers.params().pass_offset(ty) {
        buffers.accumulate(pixel, offset, values);
    }
}

/// Add one sample of a pixel to every pass the buffer carries.
pub fn film_write(buffers: &RenderBuffers, path: &PathData, l: &PathRadiance) {
    let pixel = path.render_pixel_index as usize;
    let c = l.combined;

    write_pass(buffers, pixel, PassType::Combined, &[c.x, c.y, c.z, l.alpha()]);
    write_pass(buffers, pixel, PassType::SampleCount, &[1.0]);

    // Every other sample feeds the half-buffer estimate for adaptive sampling
    if path.sample & 1 == 1 {
        write_pass(buffers, pixel, PassType::AdaptiveAuxBuffer, &[2.0 * c.x, 2.0 * c.y, 2.0 * c.z, 0.0]);
    }

    for (ty, v) in [
        (PassType::Emission, l.emission),
        (PassType::Background, l.background),
        (PassType::Diffuse, l.diffuse),
        (PassType::Glossy, l.glossy),
        (PassType::Transmission, l.transmission),
        (PassType::Volume, l.volume),
        (PassType::DenoisingAlbedo, l.denoising_albedo),
        (PassType::DenoisingNormal, l.denoising_normal),
    ] {
        write_pass(buffers, pixel, ty, &v.to_array());
    }

    if let Some(depth) = l.depth {
        write_pass(buffers, pixel, PassType::Depth, &[depth]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::render_buffers::BufferParams;
    use glam::Vec3;

    #[test]
    fn test_film_write_only_present_passes() {
        let params = BufferParams::new(
            2,
            1,
            &[PassType::Combined, PassType::SampleCount, PassType::AdaptiveAuxBuffer, PassType::Depth],
        )
        .unwrap();
        let buffers = RenderBuffers::new(params);
        let l = PathRadiance {
            combined: Vec3::new(1.0, 2.0, 3.0),
            depth: Some(5.0),
            emission: Vec3::ONE,
            ..Default::default()
        };
        let mut path = PathData {
            render_pixel_index: 1,
            sample: 0,
            ..Default::default()
        };
        film_write(&buffers, &path, &l);
        path.sample = 1;
        film_write(&buffers, &path, &l);

        let snapshot = buffers.snapshot(2);
        assert_eq!(snapshot.pixel(1, 0, PassType::Combined), Some(&[2.0, 4.0, 6.0, 2.0][..]));
        assert_eq!(snapshot.pixel(1, 0, PassType::SampleCount), Some(&[2.0][..]));
        assert_eq!(snapshot.pixel(1, 0, PassType::AdaptiveAuxBuffer), Some(&[2.0, 4.0, 6.0, 0.0][..]));
        assert_eq!(snapshot.pixel(1, 0, PassType::Depth), Some(&[10.0][..]));
        assert_eq!(snapshot.pixel(0, 0, PassType::SampleCount), Some(&[0.0][..]));
    }
}
