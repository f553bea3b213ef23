//! Harris corners described by normalized intensity patches.
//!
//! The response is `det(M) - k * trace(M)^2` of the gradient structure
//! tensor `M` summed over a square window. Corners are the 3x3 local maxima
//! above a fraction of the strongest response, picked per grid cell so they
//! cover the whole patch.

use common::Buffer2;
use glam::DVec2;

use super::{FeatureExtractor, Keypoint};
use crate::raster::MaskedImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarrisConfig {
    /// Harris sensitivity, typically 0.04–0.06.
    pub k: f32,
    /// Half-size of the structure tensor window.
    pub window_radius: usize,
    /// Half-size of the descriptor patch.
    pub patch_radius: usize,
    /// Corners are spread over `grid_cells x grid_cells` cells.
    pub grid_cells: usize,
    /// Minimum response relative to the strongest one.
    pub relative_threshold: f32,
}

impl Default for HarrisConfig {
    fn default() -> Self {
        Self {
            k: 0.04,
            window_radius: 2,
            patch_radius: 5,
            grid_cells: 4,
            relative_threshold: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarrisPatchExtractor {
    config: HarrisConfig,
}

impl HarrisPatchExtractor {
    pub fn new(config: HarrisConfig) -> Self {
        Self { config }
    }

    /// Corner response; pixels whose support touches an invalid pixel get
    /// `f32::NEG_INFINITY`.
    pub fn corner_response(&self, image: &MaskedImage) -> Buffer2<f32> {
        let (w, h) = image.size();
        let r = self.config.window_radius;

        // Central-difference gradients, zero where the 3x3 support is invalid.
        let mut ix = Buffer2::new_filled(w, h, 0.0f32);
        let mut iy = Buffer2::new_filled(w, h, 0.0f32);
        let mut grad_ok = Buffer2::new_filled(w, h, false);
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let support_ok = (y - 1..=y + 1)
                    .all(|sy| (x - 1..=x + 1).all(|sx| image.is_valid(sx, sy)));
                if !support_ok {
                    continue;
                }
                ix[(x, y)] = 0.5 * (image.pixels[(x + 1, y)] - image.pixels[(x - 1, y)]);
                iy[(x, y)] = 0.5 * (image.pixels[(x, y + 1)] - image.pixels[(x, y - 1)]);
                grad_ok[(x, y)] = true;
            }
        }

        let mut response = Buffer2::new_filled(w, h, f32::NEG_INFINITY);
        for y in r..h.saturating_sub(r) {
            for x in r..w.saturating_sub(r) {
                let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
                let mut ok = true;
                'window: for wy in y - r..=y + r {
                    for wx in x - r..=x + r {
                        if !grad_ok[(wx, wy)] {
                            ok = false;
                            break 'window;
                        }
                        let (gx, gy) = (ix[(wx, wy)], iy[(wx, wy)]);
                        sxx += gx * gx;
                        syy += gy * gy;
                        sxy += gx * gy;
                    }
                }
                if ok {
                    let det = sxx * syy - sxy * sxy;
                    let trace = sxx + syy;
                    response[(x, y)] = det - self.config.k * trace * trace;
                }
            }
        }
        response
    }

    fn describe(&self, image: &MaskedImage, x: usize, y: usize) -> Option<Vec<f32>> {
        let p = self.config.patch_radius;
        if x < p || y < p || x + p >= image.width() || y + p >= image.height() {
            return None;
        }
        let mut patch = Vec::with_capacity((2 * p + 1) * (2 * p + 1));
        for py in y - p..=y + p {
            for px in x - p..=x + p {
                if !image.is_valid(px, py) {
                    return None;
                }
                patch.push(image.pixels[(px, py)]);
            }
        }
        let mean = patch.iter().sum::<f32>() / patch.len() as f32;
        for v in &mut patch {
            *v -= mean;
        }
        let norm = patch.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < 1e-6 {
            return None;
        }
        for v in &mut patch {
            *v /= norm;
        }
        Some(patch)
    }
}

impl FeatureExtractor for HarrisPatchExtractor {
    fn extract(&self, image: &MaskedImage, max_features: usize) -> Vec<Keypoint> {
        let (w, h) = image.size();
        if max_features == 0 || w < 3 || h < 3 {
            return Vec::new();
        }
        let response = self.corner_response(image);
        let peak = response.iter().copied().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return Vec::new();
        }
        let floor = peak * self.config.relative_threshold;

        let cells = self.config.grid_cells.max(1);
        let mut per_cell: Vec<Vec<(usize, usize, f32)>> = vec![Vec::new(); cells * cells];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let v = response[(x, y)];
                if v <= floor {
                    continue;
                }
                let is_max = (y - 1..=y + 1).all(|ny| {
                    (x - 1..=x + 1).all(|nx| (nx == x && ny == y) || response[(nx, ny)] < v)
                });
                if is_max {
                    let cell = (y * cells / h) * cells + x * cells / w;
                    per_cell[cell].push((x, y, v));
                }
            }
        }

        let quota = max_features.div_ceil(cells * cells);
        let mut keypoints = Vec::new();
        for mut candidates in per_cell {
            candidates.sort_by(|a, b| b.2.total_cmp(&a.2));
            let mut taken = 0;
            for (x, y, v) in candidates {
                if taken == quota {
                    break;
                }
                if let Some(descriptor) = self.describe(image, x, y) {
                    keypoints.push(Keypoint {
                        position: DVec2::new(x as f64, y as f64),
                        response: v,
                        descriptor,
                    });
                    taken += 1;
                }
            }
        }

        keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
        keypoints.truncate(max_features);
        keypoints
    }
}
