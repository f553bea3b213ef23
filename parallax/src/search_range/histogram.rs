use glam::Vec2;

use crate::math::SearchRange;

/// Search window from the distribution of correspondence offsets.
///
/// Offsets are binned per axis over their observed extent. The bins holding
/// the low and high percentiles bound a tight window, which is then
/// inflated about its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramRangeEstimator {
    pub bins: usize,
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub inflation: f32,
}

impl Default for HistogramRangeEstimator {
    fn default() -> Self {
        Self {
            bins: 2000,
            low_percentile: 0.05,
            high_percentile: 0.95,
            inflation: 2.0,
        }
    }
}

impl HistogramRangeEstimator {
    /// Percentile window before inflation; `None` without offsets.
    pub fn percentile_window(&self, offsets: &[Vec2]) -> Option<SearchRange> {
        if offsets.is_empty() {
            return None;
        }
        let xs: Vec<f64> = offsets.iter().map(|o| o.x as f64).collect();
        let ys: Vec<f64> = offsets.iter().map(|o| o.y as f64).collect();
        let (min_x, max_x) = self.axis_window(&xs);
        let (min_y, max_y) = self.axis_window(&ys);
        Some(SearchRange::from_bounds(
            min_x as f32,
            min_y as f32,
            max_x as f32,
            max_y as f32,
        ))
    }

    /// Inflated window; `None` without offsets.
    pub fn window(&self, offsets: &[Vec2]) -> Option<SearchRange> {
        self.percentile_window(offsets)
            .map(|tight| tight.inflate(self.inflation))
    }

    fn axis_window(&self, values: &[f64]) -> (f64, f64) {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let extent = max - min;
        if extent <= 0.0 {
            return (min, max);
        }

        let bins = self.bins.max(1);
        let width = extent / bins as f64;
        let mut hist = vec![0usize; bins];
        for &v in values {
            // Saturating assignment keeps the extremes in the end bins.
            let bin = ((bins - 1) as f64 * (v - min) / extent).round();
            hist[(bin.max(0.0) as usize).min(bins - 1)] += 1;
        }

        let center = |i: usize| min + (i as f64 + 0.5) * width;
        let lo = percentile_bin(&hist, values.len(), self.low_percentile);
        let hi = percentile_bin(&hist, values.len(), self.high_percentile);
        (center(lo), center(hi))
    }
}

/// First bin at which the cumulative fraction reaches `q`.
fn percentile_bin(hist: &[usize], total: usize, q: f64) -> usize {
    let mut seen = 0usize;
    for (i, &count) in hist.iter().enumerate() {
        seen += count;
        if seen as f64 / total as f64 >= q {
            return i;
        }
    }
    hist.len() - 1
}
