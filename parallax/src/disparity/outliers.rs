//! Outlier rejection for low-resolution seed disparities.

use serde::{Deserialize, Serialize};

use super::{DisparityField, DisparityPixel};

/// Rule applied to a disparity field to invalidate isolated or extreme
/// offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutlierRejection {
    /// Keeps a pixel when at least `min_match_fraction` of its
    /// `(2 * half_kernel + 1)^2 - 1` neighbours are valid and agree with it
    /// within `threshold` on both axes.
    Threshold {
        half_kernel: usize,
        threshold: f32,
        min_match_fraction: f32,
    },
    /// Per axis, keeps offsets inside
    /// `[q_lo - multiple * spread, q_hi + multiple * spread]` where
    /// `q_hi` is the `percentile` quantile, `q_lo` the `1 - percentile`
    /// quantile and `spread = q_hi - q_lo`.
    Quantile { percentile: f32, multiple: f32 },
}

pub fn reject_outliers(field: &DisparityField, rule: &OutlierRejection) -> DisparityField {
    match *rule {
        OutlierRejection::Threshold {
            half_kernel,
            threshold,
            min_match_fraction,
        } => reject_by_neighbours(field, half_kernel, threshold, min_match_fraction),
        OutlierRejection::Quantile {
            percentile,
            multiple,
        } => reject_by_quantile(field, percentile, multiple),
    }
}

fn reject_by_neighbours(
    field: &DisparityField,
    half_kernel: usize,
    threshold: f32,
    min_match_fraction: f32,
) -> DisparityField {
    let (w, h) = field.size();
    let k = half_kernel as i64;
    let neighbours = ((2 * half_kernel + 1) * (2 * half_kernel + 1) - 1) as f32;
    let required = min_match_fraction * neighbours;

    DisparityField::from_fn(w, h, |x, y| {
        let center = field.get(x, y);
        if !center.valid {
            return DisparityPixel::INVALID;
        }
        let mut agreeing = 0usize;
        for dy in -k..=k {
            for dx in -k..=k {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let Some(n) = field.pixels().get_checked(x as i64 + dx, y as i64 + dy) else {
                    continue;
                };
                if !n.valid {
                    continue;
                }
                let diff = (n.offset - center.offset).abs();
                if diff.x < threshold && diff.y < threshold {
                    agreeing += 1;
                }
            }
        }
        if agreeing as f32 >= required {
            center
        } else {
            DisparityPixel::INVALID
        }
    })
}

fn reject_by_quantile(field: &DisparityField, percentile: f32, multiple: f32) -> DisparityField {
    let mut xs: Vec<f32> = field.iter_valid().map(|(_, _, o)| o.x).collect();
    let mut ys: Vec<f32> = field.iter_valid().map(|(_, _, o)| o.y).collect();
    if xs.is_empty() {
        return field.clone();
    }
    let bounds_x = quantile_bounds(&mut xs, percentile, multiple);
    let bounds_y = quantile_bounds(&mut ys, percentile, multiple);

    let mut out = field.clone();
    for p in out.pixels_mut().iter_mut().filter(|p| p.valid) {
        let inside = |v: f32, (lo, hi): (f32, f32)| v >= lo && v <= hi;
        if !inside(p.offset.x, bounds_x) || !inside(p.offset.y, bounds_y) {
            *p = DisparityPixel::INVALID;
        }
    }
    out
}

fn quantile_bounds(values: &mut [f32], percentile: f32, multiple: f32) -> (f32, f32) {
    values.sort_by(f32::total_cmp);
    let hi_q = percentile.max(1.0 - percentile);
    let lo = quantile_sorted(values, 1.0 - hi_q);
    let hi = quantile_sorted(values, hi_q);
    let spread = hi - lo;
    (lo - multiple * spread, hi + multiple * spread)
}

/// Linear-interpolated quantile of sorted, non-empty values.
fn quantile_sorted(sorted: &[f32], q: f32) -> f32 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * t
}
