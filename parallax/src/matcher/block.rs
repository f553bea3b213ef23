use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use common::Buffer2;
use glam::{IVec2, Vec2};
use rayon::prelude::*;

use super::{MatchRequest, Matcher, integer_candidates};
use crate::config::CostFunction;
use crate::disparity::{DisparityField, DisparityPixel};
use crate::error::{Error, Result};
use crate::math::PixelBox;
use crate::raster::MaskedImage;

/// Window variance below which a normalized correlation is undefined.
const MIN_VARIANCE: f64 = 1e-9;

/// Exhaustive window correlation with a left-right consistency check.
///
/// A candidate is scored only where both windows are fully valid. Offsets
/// whose reverse match disagrees by more than `consistency_tolerance` on
/// either axis are dropped, which also clears borders where the true match
/// falls outside the right crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockMatcher {
    /// Parabolic refinement around the best integer offset.
    pub subpixel: bool,
    pub consistency_tolerance: i32,
}

impl Default for BlockMatcher {
    fn default() -> Self {
        Self {
            subpixel: false,
            consistency_tolerance: 0,
        }
    }
}

impl BlockMatcher {
    pub fn new(subpixel: bool) -> Self {
        Self {
            subpixel,
            ..Self::default()
        }
    }
}

impl Matcher for BlockMatcher {
    fn correlate(&self, request: &MatchRequest<'_>) -> Result<DisparityField> {
        let [kw, kh] = request.kernel;
        if kw % 2 == 0 || kh % 2 == 0 {
            return Err(Error::Matcher(format!("kernel must be odd, got {kw}x{kh}")));
        }
        let left_box = PixelBox::from_size(request.left.width(), request.left.height());
        if !left_box.contains_box(&request.roi) {
            return Err(Error::Matcher(format!(
                "region {} outside left image {}",
                request.roi, left_box
            )));
        }

        let (w, h) = request.roi.size();
        let candidates = request.candidates();
        if candidates.is_empty() || request.roi.is_empty() {
            return Ok(DisparityField::new_invalid(w, h));
        }

        let start = Instant::now();
        let deadline = match request.budget {
            Some(budget) => {
                let ops = 2.0 * request.op_count();
                if !budget.allows(ops) {
                    tracing::warn!(
                        roi = %request.roi,
                        estimate = ?budget.estimate(ops),
                        timeout = ?budget.timeout,
                        "correlation would exceed its time budget, skipping"
                    );
                    return Ok(DisparityField::new_invalid(w, h));
                }
                Some(budget.deadline_from(start))
            }
            None => None,
        };

        let half = IVec2::new((kw / 2) as i32, (kh / 2) as i32);
        let search = WindowSearch {
            half,
            cost: request.cost,
            deadline,
        };

        let Some(forward) = search.best_offsets(request.left, request.right, request.roi, &candidates)
        else {
            return Ok(timed_out(request.roi, w, h));
        };

        // Reverse pass over every right pixel a forward match can land on.
        let reach = integer_candidates(&request.search_range);
        let (reach_min, reach_max) = reach
            .iter()
            .fold((IVec2::MAX, IVec2::MIN), |(lo, hi), d| (lo.min(*d), hi.max(*d)));
        let right_box = PixelBox::from_size(request.right.width(), request.right.height());
        let back_roi = PixelBox::from_corners(request.roi.min + reach_min, request.roi.max + reach_max)
            .intersect(&right_box);
        let reverse_candidates: Vec<IVec2> = candidates.iter().map(|d| -*d).collect();
        let Some(backward) =
            search.best_offsets(request.right, request.left, back_roi, &reverse_candidates)
        else {
            return Ok(timed_out(request.roi, w, h));
        };

        let tolerance = self.consistency_tolerance;
        let field = DisparityField::from_fn(w, h, |x, y| {
            let Some(d) = forward[(x, y)] else {
                return DisparityPixel::INVALID;
            };
            let p = request.roi.min + IVec2::new(x as i32, y as i32);
            let q = p + d;
            if !back_roi.contains(q) {
                return DisparityPixel::INVALID;
            }
            let local = q - back_roi.min;
            let Some(e) = backward[(local.x as usize, local.y as usize)] else {
                return DisparityPixel::INVALID;
            };
            if (d + e).abs().max_element() > tolerance {
                return DisparityPixel::INVALID;
            }

            let mut offset = d.as_vec2();
            if self.subpixel {
                offset += search.subpixel_shift(request.left, request.right, p, d);
            }
            DisparityPixel::new(offset)
        });
        Ok(field)
    }
}

fn timed_out(roi: PixelBox, w: usize, h: usize) -> DisparityField {
    tracing::warn!(roi = %roi, "correlation ran out of time, tile left invalid");
    DisparityField::new_invalid(w, h)
}

struct WindowSearch {
    half: IVec2,
    cost: CostFunction,
    deadline: Option<Instant>,
}

impl WindowSearch {
    /// Lowest-cost candidate per `roi` pixel of `reference`, or `None` once
    /// the deadline passes.
    fn best_offsets(
        &self,
        reference: &MaskedImage,
        target: &MaskedImage,
        roi: PixelBox,
        candidates: &[IVec2],
    ) -> Option<Buffer2<Option<IVec2>>> {
        let (w, h) = roi.size();
        let area = roi.expand_xy(self.half);
        let expired = AtomicBool::new(false);

        let best = candidates
            .par_iter()
            .try_fold(
                || BestCost::new(w * h),
                |mut best, &d| {
                    if expired.load(Ordering::Relaxed)
                        || self.deadline.is_some_and(|t| Instant::now() > t)
                    {
                        expired.store(true, Ordering::Relaxed);
                        return None;
                    }
                    let sums = WindowSums::build(reference, target, area, d, self.cost);
                    for y in 0..h {
                        for x in 0..w {
                            if let Some(c) = sums.window_cost(x, y, self.half, self.cost) {
                                best.offer(y * w + x, c, d);
                            }
                        }
                    }
                    Some(best)
                },
            )
            .try_reduce(|| BestCost::new(w * h), |a, b| Some(a.merge(b)))?;

        Some(Buffer2::new(w, h, best.offset))
    }

    /// Vertex of the cost parabola through `d - 1`, `d`, `d + 1`, per axis.
    fn subpixel_shift(&self, left: &MaskedImage, right: &MaskedImage, p: IVec2, d: IVec2) -> Vec2 {
        let cost_at = |d: IVec2| single_window_cost(left, right, p, d, self.half, self.cost);
        let Some(c0) = cost_at(d) else {
            return Vec2::ZERO;
        };
        let axis = |step: IVec2| -> f32 {
            let (Some(cm), Some(cp)) = (cost_at(d - step), cost_at(d + step)) else {
                return 0.0;
            };
            let curvature = cm - 2.0 * c0 + cp;
            if curvature <= 0.0 {
                return 0.0;
            }
            ((cm - cp) / (2.0 * curvature)).clamp(-0.5, 0.5) as f32
        };
        Vec2::new(axis(IVec2::X), axis(IVec2::Y))
    }
}

#[derive(Debug)]
struct BestCost {
    cost: Vec<f64>,
    offset: Vec<Option<IVec2>>,
}

impl BestCost {
    fn new(len: usize) -> Self {
        Self {
            cost: vec![f64::INFINITY; len],
            offset: vec![None; len],
        }
    }

    /// Lower cost wins; ties go to the candidate earlier in row order so
    /// the result does not depend on how rayon splits the work.
    fn offer(&mut self, i: usize, cost: f64, d: IVec2) {
        let better = match self.offset[i] {
            None => true,
            Some(cur) => {
                cost < self.cost[i] || (cost == self.cost[i] && (d.y, d.x) < (cur.y, cur.x))
            }
        };
        if better {
            self.cost[i] = cost;
            self.offset[i] = Some(d);
        }
    }

    fn merge(mut self, other: BestCost) -> BestCost {
        for (i, (cost, offset)) in other.cost.into_iter().zip(other.offset).enumerate() {
            if let Some(d) = offset {
                self.offer(i, cost, d);
            }
        }
        self
    }
}

fn sample(image: &MaskedImage, p: IVec2) -> Option<f64> {
    if p.x < 0 || p.y < 0 {
        return None;
    }
    let (x, y) = (p.x as usize, p.y as usize);
    (x < image.width() && y < image.height() && image.is_valid(x, y))
        .then(|| image.pixels[(x, y)] as f64)
}

/// Summed-area table with a zero first row and column.
struct Integral {
    stride: usize,
    data: Vec<f64>,
}

impl Integral {
    fn new(width: usize, height: usize, values: &[f64]) -> Self {
        let stride = width + 1;
        let mut data = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += values[y * width + x];
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, data }
    }

    /// Sum over `[x0, x1) x [y0, y1)`.
    #[inline]
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.data[y1 * s + x1] - self.data[y0 * s + x1] - self.data[y1 * s + x0]
            + self.data[y0 * s + x0]
    }
}

/// Window sums of one candidate offset over `area`.
struct WindowSums {
    invalid: Integral,
    terms: Vec<Integral>,
}

impl WindowSums {
    fn build(
        reference: &MaskedImage,
        target: &MaskedImage,
        area: PixelBox,
        d: IVec2,
        cost: CostFunction,
    ) -> Self {
        let (aw, ah) = area.size();
        let term_count = match cost {
            CostFunction::NormalizedCrossCorrelation => 5,
            _ => 1,
        };
        let mut invalid = vec![0.0; aw * ah];
        let mut terms = vec![vec![0.0; aw * ah]; term_count];

        for y in 0..ah {
            for x in 0..aw {
                let i = y * aw + x;
                let p = area.min + IVec2::new(x as i32, y as i32);
                let (Some(l), Some(r)) = (sample(reference, p), sample(target, p + d)) else {
                    invalid[i] = 1.0;
                    continue;
                };
                match cost {
                    CostFunction::AbsoluteDifference => terms[0][i] = (l - r).abs(),
                    CostFunction::SquaredDifference => terms[0][i] = (l - r) * (l - r),
                    CostFunction::NormalizedCrossCorrelation => {
                        terms[0][i] = l;
                        terms[1][i] = r;
                        terms[2][i] = l * l;
                        terms[3][i] = r * r;
                        terms[4][i] = l * r;
                    }
                }
            }
        }

        Self {
            invalid: Integral::new(aw, ah, &invalid),
            terms: terms.iter().map(|t| Integral::new(aw, ah, t)).collect(),
        }
    }

    /// Cost of the window centred on `roi`-local `(x, y)`.
    fn window_cost(&self, x: usize, y: usize, half: IVec2, cost: CostFunction) -> Option<f64> {
        let x1 = x + 2 * half.x as usize + 1;
        let y1 = y + 2 * half.y as usize + 1;
        if self.invalid.sum(x, y, x1, y1) > 0.5 {
            return None;
        }
        let sums: Vec<f64> = self.terms.iter().map(|t| t.sum(x, y, x1, y1)).collect();
        let n = ((x1 - x) * (y1 - y)) as f64;
        finish_cost(cost, &sums, n)
    }
}

/// Lower is better for every cost function.
fn finish_cost(cost: CostFunction, sums: &[f64], n: f64) -> Option<f64> {
    match cost {
        CostFunction::AbsoluteDifference | CostFunction::SquaredDifference => Some(sums[0]),
        CostFunction::NormalizedCrossCorrelation => {
            let [sl, sr, sll, srr, slr] = [sums[0], sums[1], sums[2], sums[3], sums[4]];
            let var_l = sll - sl * sl / n;
            let var_r = srr - sr * sr / n;
            if var_l <= MIN_VARIANCE * n || var_r <= MIN_VARIANCE * n {
                return None;
            }
            let cov = slr - sl * sr / n;
            Some(1.0 - cov / (var_l * var_r).sqrt())
        }
    }
}

/// Direct evaluation of one window, for refinement.
fn single_window_cost(
    left: &MaskedImage,
    right: &MaskedImage,
    p: IVec2,
    d: IVec2,
    half: IVec2,
    cost: CostFunction,
) -> Option<f64> {
    let mut sums = [0.0f64; 5];
    let mut n = 0.0;
    for wy in -half.y..=half.y {
        for wx in -half.x..=half.x {
            let q = p + IVec2::new(wx, wy);
            let l = sample(left, q)?;
            let r = sample(right, q + d)?;
            match cost {
                CostFunction::AbsoluteDifference => sums[0] += (l - r).abs(),
                CostFunction::SquaredDifference => sums[0] += (l - r) * (l - r),
                CostFunction::NormalizedCrossCorrelation => {
                    sums[0] += l;
                    sums[1] += r;
                    sums[2] += l * l;
                    sums[3] += r * r;
                    sums[4] += l * r;
                }
            }
            n += 1.0;
        }
    }
    finish_cost(cost, &sums, n)
}
