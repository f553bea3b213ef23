//! Synthetic inputs shared by the unit tests.

use common::Buffer2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::raster::{MaskedImage, MemoryRaster};

/// Seeded white noise in `[0, 255]`, smoothed by a 3x3 box so gradients are
/// well defined.
pub fn noise_texture(width: usize, height: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let raw = Buffer2::from_fn(width, height, |_, _| rng.random_range(0.0f32..255.0));
    Buffer2::from_fn(width, height, |x, y| {
        let mut sum = 0.0;
        let mut count = 0.0;
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                sum += raw[(nx, ny)];
                count += 1.0;
            }
        }
        sum / count
    })
}

/// `out(x, y) = image(x - dx, y - dy)`, `NaN` where the source is outside.
pub fn shifted(image: &Buffer2<f32>, dx: i64, dy: i64) -> Buffer2<f32> {
    image.crop(-dx, -dy, image.width(), image.height(), f32::NAN)
}

pub fn masked(pixels: Buffer2<f32>) -> MaskedImage {
    MaskedImage::from_pixels(pixels, None)
}

pub fn flat(width: usize, height: usize, value: f32) -> Buffer2<f32> {
    Buffer2::new_filled(width, height, value)
}

/// Left texture and a right copy shifted by `(dx, dy)`, as rasters.
pub fn shifted_pair(
    width: usize,
    height: usize,
    dx: i64,
    dy: i64,
    seed: u64,
) -> (MemoryRaster, MemoryRaster) {
    let left = noise_texture(width, height, seed);
    let right = shifted(&left, dx, dy);
    (MemoryRaster::new(left), MemoryRaster::new(right))
}
