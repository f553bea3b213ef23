//! Resampling of image crops and disparity fields through planar transforms.
//!
//! Both directions are inverse-mapped: every output pixel is pulled from the
//! source with bilinear weights. A sample is valid only when every source
//! tap with non-zero weight is valid.

#[cfg(test)]
mod tests;

use common::Buffer2;
use common::parallel::ParRowsMutAuto;
use glam::DVec2;
use rayon::prelude::*;

use crate::disparity::{DisparityField, DisparityPixel};
use crate::raster::MaskedImage;
use crate::transform::Transform;

/// Fractions closer than this to a pixel centre snap onto it, so exact
/// integer coordinates never reach past the last row or column.
const SNAP: f64 = 1e-6;

/// Up to four `(x, y, weight)` taps of a bilinear sample.
#[derive(Debug, Clone, Copy)]
struct Taps {
    taps: [(usize, usize, f64); 4],
}

impl Taps {
    fn at(p: DVec2, width: usize, height: usize) -> Option<Taps> {
        if !p.is_finite() {
            return None;
        }
        let (x0, fx) = split_axis(p.x, width)?;
        let (y0, fy) = split_axis(p.y, height)?;
        let x1 = if fx > 0.0 { x0 + 1 } else { x0 };
        let y1 = if fy > 0.0 { y0 + 1 } else { y0 };
        Some(Taps {
            taps: [
                (x0, y0, (1.0 - fx) * (1.0 - fy)),
                (x1, y0, fx * (1.0 - fy)),
                (x0, y1, (1.0 - fx) * fy),
                (x1, y1, fx * fy),
            ],
        })
    }

    fn all_valid(&self, valid: impl Fn(usize, usize) -> bool) -> bool {
        self.taps
            .iter()
            .all(|&(x, y, w)| w <= 0.0 || valid(x, y))
    }

    fn weighted<T>(&self, value: impl Fn(usize, usize) -> T) -> T
    where
        T: std::ops::Mul<f64, Output = T> + std::ops::Add<Output = T>,
    {
        let [a, b, c, d] = self.taps;
        value(a.0, a.1) * a.2 + value(b.0, b.1) * b.2 + value(c.0, c.1) * c.2 + value(d.0, d.1) * d.2
    }
}

/// Integer cell and fraction of `v` along an axis of length `len`, or
/// `None` when the sample needs a tap outside `0..len`.
fn split_axis(v: f64, len: usize) -> Option<(usize, f64)> {
    let mut i = v.floor();
    let mut f = v - i;
    if f < SNAP {
        f = 0.0;
    } else if f > 1.0 - SNAP {
        i += 1.0;
        f = 0.0;
    }
    if i < 0.0 {
        return None;
    }
    let i = i as usize;
    let last = if f > 0.0 { i + 1 } else { i };
    (last < len).then_some((i, f))
}

/// Renders `image` through `transform` into an `out_size` canvas:
/// `out(q) = image(transform^-1(q))`. Pixels without full valid support
/// become invalid. Returns `None` for a singular transform.
pub fn warp_masked(
    image: &MaskedImage,
    transform: &Transform,
    out_size: (usize, usize),
) -> Option<MaskedImage> {
    let inverse = transform.inverse()?;
    let (out_w, out_h) = out_size;
    let (w, h) = image.size();
    let m = inverse.matrix.as_array();
    let affine = m[6] == 0.0 && m[7] == 0.0 && m[8] == 1.0;

    let mut out = vec![f32::NAN; out_w * out_h];
    if out_w > 0 {
        out.par_rows_mut_auto(out_w).for_each(|(first_row, chunk)| {
            for (local_y, row) in chunk.chunks_mut(out_w).enumerate() {
                let y = (first_row + local_y) as f64;
                let mut src = inverse.apply(DVec2::new(0.0, y));
                let step = DVec2::new(m[0], m[3]);
                for (x, px) in row.iter_mut().enumerate() {
                    if !affine {
                        src = inverse.apply(DVec2::new(x as f64, y));
                    }
                    if let Some(taps) = Taps::at(src, w, h)
                        && taps.all_valid(|sx, sy| image.is_valid(sx, sy))
                    {
                        *px = taps.weighted(|sx, sy| image.pixels[(sx, sy)] as f64) as f32;
                    }
                    if affine {
                        src += step;
                    }
                }
            }
        });
    }

    Some(MaskedImage::from_pixels(Buffer2::new(out_w, out_h, out), None))
}

/// Maps a disparity field computed between warped crops back to the native
/// crop frame.
///
/// For every native left pixel `p` of an `out_size` grid: `q = left(p)`,
/// `d` = `warped` sampled at `q`, the right match is `right^-1(q + d)`
/// and the native disparity is that match minus `p`. Pixels whose sample
/// is missing or invalid stay invalid.
pub fn reconcile_disparity(
    warped: &DisparityField,
    left: &Transform,
    right: &Transform,
    out_size: (usize, usize),
) -> Option<DisparityField> {
    let right_inv = right.inverse()?;
    let (out_w, out_h) = out_size;
    let (w, h) = warped.size();

    let mut pixels = vec![DisparityPixel::INVALID; out_w * out_h];
    if out_w > 0 {
        pixels.par_rows_mut_auto(out_w).for_each(|(first_row, chunk)| {
            for (local_y, row) in chunk.chunks_mut(out_w).enumerate() {
                let y = first_row + local_y;
                for (x, px) in row.iter_mut().enumerate() {
                    let p = DVec2::new(x as f64, y as f64);
                    let q = left.apply(p);
                    let Some(taps) = Taps::at(q, w, h) else {
                        continue;
                    };
                    if !taps.all_valid(|sx, sy| warped.get(sx, sy).valid) {
                        continue;
                    }
                    let d = taps.weighted(|sx, sy| warped.get(sx, sy).offset.as_dvec2());
                    let r = right_inv.apply(q + d);
                    if r.is_finite() {
                        *px = DisparityPixel::new((r - p).as_vec2());
                    }
                }
            }
        });
    }

    Some(DisparityField::from_buffer(Buffer2::new(out_w, out_h, pixels)))
}
