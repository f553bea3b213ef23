//! The dense matching service the correlator drives.
//!
//! A [`Matcher`] turns a pair of same-frame crops into a disparity field
//! over a region of the left crop. [`BlockMatcher`] is the local window
//! correlator; aggregating matchers plug in through the same trait.

mod block;

#[cfg(test)]
mod tests;

use std::time::{Duration, Instant};

use crate::config::CostFunction;
use crate::disparity::DisparityField;
use crate::error::Result;
use crate::math::{PixelBox, SearchRange};
use crate::raster::MaskedImage;

pub use block::BlockMatcher;

/// One matching job. `left` and `right` share a pixel frame; disparities
/// are produced for the `roi` pixels of `left`.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub left: &'a MaskedImage,
    pub right: &'a MaskedImage,
    pub roi: PixelBox,
    /// Candidate offsets, inclusive.
    pub search_range: SearchRange,
    /// Window `[width, height]`.
    pub kernel: [usize; 2],
    pub cost: CostFunction,
    pub budget: Option<TimeBudget>,
}

impl MatchRequest<'_> {
    /// Integer offsets inside the search range, row by row.
    pub fn candidates(&self) -> Vec<glam::IVec2> {
        integer_candidates(&self.search_range)
    }

    /// Elementary cost evaluations of a plain window search.
    pub fn op_count(&self) -> f64 {
        self.roi.area() as f64
            * self.candidates().len() as f64
            * (self.kernel[0] * self.kernel[1]) as f64
    }
}

pub(crate) fn integer_candidates(range: &SearchRange) -> Vec<glam::IVec2> {
    if range.is_empty() {
        return Vec::new();
    }
    let min = range.min.ceil().as_ivec2();
    let max = range.max.floor().as_ivec2();
    (min.y..=max.y)
        .flat_map(|dy| (min.x..=max.x).map(move |dx| glam::IVec2::new(dx, dy)))
        .collect()
}

pub trait Matcher: Send + Sync {
    /// Disparity field of `request.roi` size. Pixels without a match are
    /// invalid.
    fn correlate(&self, request: &MatchRequest<'_>) -> Result<DisparityField>;

    /// Matchers with their own thread pool are run one tile at a time.
    fn is_multithreaded(&self) -> bool {
        false
    }
}

/// Soft limit on a single matching job. Running out is not an error: the
/// job gives up and returns an all-invalid field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBudget {
    pub timeout: Duration,
    /// Measured cost of one elementary operation.
    pub seconds_per_op: f64,
}

impl TimeBudget {
    pub fn new(timeout_secs: f64, seconds_per_op: f64) -> Self {
        Self {
            timeout: Duration::from_secs_f64(timeout_secs.max(0.0)),
            seconds_per_op,
        }
    }

    pub fn estimate(&self, ops: f64) -> Duration {
        Duration::from_secs_f64((ops * self.seconds_per_op).max(0.0))
    }

    /// `false` when `ops` operations are predicted to overrun the timeout.
    pub fn allows(&self, ops: f64) -> bool {
        self.estimate(ops) <= self.timeout
    }

    pub fn deadline_from(&self, start: Instant) -> Instant {
        start + self.timeout
    }
}

const CALIBRATION_PATCH: usize = 64;
const CALIBRATION_RANGE: SearchRange = SearchRange::from_bounds(0.0, 0.0, 7.0, 1.0);

/// Times `matcher` on a central patch of the inputs and returns the
/// measured seconds per elementary operation.
pub fn calibrate_seconds_per_op(
    matcher: &dyn Matcher,
    left: &MaskedImage,
    right: &MaskedImage,
    kernel: [usize; 2],
    cost: CostFunction,
) -> Result<f64> {
    let (w, h) = left.size();
    let pw = w.min(CALIBRATION_PATCH);
    let ph = h.min(CALIBRATION_PATCH);
    let roi = PixelBox::new(((w - pw) / 2) as i32, ((h - ph) / 2) as i32, pw as i32, ph as i32);

    let request = MatchRequest {
        left,
        right,
        roi,
        search_range: CALIBRATION_RANGE,
        kernel,
        cost,
        budget: None,
    };
    let ops = request.op_count();
    let start = Instant::now();
    matcher.correlate(&request)?;
    let elapsed = start.elapsed().as_secs_f64();

    let seconds_per_op = if ops > 0.0 { elapsed / ops } else { 0.0 };
    tracing::debug!(seconds_per_op, ops, "calibrated matcher speed");
    Ok(seconds_per_op)
}
