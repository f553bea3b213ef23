//! Per-tile piecewise realignment.
//!
//! Each tile's crops are matched with sparse features. When the matches
//! show enough vertical misalignment, a local transform pair is fit that
//! brings corresponding rows together, and the crops are matched in that
//! aligned frame. Any failure falls back to the identity pair and the
//! caller's search range.

mod epipolar;
mod quality;

#[cfg(test)]
mod tests;

use glam::Vec2;
use rand::Rng;

use crate::config::{AlignmentMode, PiecewiseConfig};
use crate::correspondence::{Correspondence, average_delta_y};
use crate::diagnostics::DiagnosticsSink;
use crate::features::{CorrespondenceFinder, FeatureExtractor};
use crate::math::SearchRange;
use crate::raster::MaskedImage;
use crate::ransac::{HomographyFit, RansacParams, RobustModelFitter};
use crate::transform::Transform;

pub use epipolar::{EpipolarRectification, rectify};
pub use quality::{DETERMINANT_RANGE, QualityVerdict, Rejection, Side, evaluate};

/// Transforms both crops are rendered through before matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentOutcome {
    pub left: Transform,
    pub right: Transform,
    /// Canvas both warped crops are rendered into.
    pub size: (usize, usize),
    pub search_range: SearchRange,
}

impl AlignmentOutcome {
    pub fn identity(size: (usize, usize), search_range: SearchRange) -> Self {
        Self {
            left: Transform::identity(),
            right: Transform::identity(),
            size,
            search_range,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.left.is_identity() && self.right.is_identity()
    }
}

pub struct PiecewiseAligner<'a> {
    mode: AlignmentMode,
    config: PiecewiseConfig,
    finder: CorrespondenceFinder<'a>,
}

impl<'a> PiecewiseAligner<'a> {
    pub fn new(
        mode: AlignmentMode,
        config: PiecewiseConfig,
        extractor: &'a dyn FeatureExtractor,
    ) -> Self {
        Self {
            mode,
            config,
            finder: CorrespondenceFinder::new(extractor, config.finder_config()),
        }
    }

    pub fn mode(&self) -> AlignmentMode {
        self.mode
    }

    /// Aligns a pair of same-frame crops. `range` is returned unchanged
    /// whenever the identity pair is used.
    pub fn align<R: Rng + ?Sized>(
        &self,
        left: &MaskedImage,
        right: &MaskedImage,
        range: &SearchRange,
        label: &str,
        diagnostics: &dyn DiagnosticsSink,
        rng: &mut R,
    ) -> AlignmentOutcome {
        let fallback = AlignmentOutcome::identity(left.size(), *range);
        if !self.mode.is_enabled() {
            return fallback;
        }

        let Some(pairs) = self.finder.find(left, right, label, diagnostics, rng) else {
            tracing::debug!(tile = label, "no correspondences, alignment skipped");
            return fallback;
        };
        let Some(before) = average_delta_y(&pairs) else {
            return fallback;
        };
        if before < self.config.min_misalignment {
            tracing::debug!(tile = label, mean_dy = before, "tile already aligned");
            return fallback;
        }

        let params = RansacParams::majority(
            self.config.ransac_iterations,
            self.config.ransac_threshold_for(self.mode),
            pairs.len(),
        );
        let fitted = match self.mode {
            AlignmentMode::None => None,
            AlignmentMode::Homography => {
                // Right is mapped onto left; left stays put.
                match RobustModelFitter::new(params).fit(&HomographyFit, &swapped(&pairs), rng) {
                    Ok(fit) => Some((Transform::identity(), fit.model, left.size())),
                    Err(reason) => {
                        tracing::debug!(tile = label, %reason, "homography fit failed");
                        None
                    }
                }
            }
            AlignmentMode::AffineEpipolar => {
                rectify(&pairs, left.size(), right.size(), params, rng)
                    .map(|r| (r.left, r.right, r.size))
            }
        };
        let Some((left_t, right_t, size)) = fitted else {
            return fallback;
        };

        match evaluate(&left_t, &right_t, &pairs, before) {
            QualityVerdict::Accepted { mean_delta_y } => {
                let search_range = aligned_search_range(
                    &pairs,
                    &left_t,
                    &right_t,
                    self.config.search_range_multiplier,
                );
                tracing::debug!(
                    tile = label,
                    before,
                    after = mean_delta_y,
                    range = %search_range,
                    "alignment accepted"
                );
                AlignmentOutcome {
                    left: left_t,
                    right: right_t,
                    size,
                    search_range,
                }
            }
            QualityVerdict::Rejected(rejection) => {
                tracing::debug!(tile = label, %rejection, "alignment rejected");
                fallback
            }
        }
    }
}

fn swapped(pairs: &[Correspondence]) -> Vec<Correspondence> {
    pairs.iter().map(Correspondence::swapped).collect()
}

/// Range of aligned offsets, always holding zero, scaled by `multiplier`
/// and rounded outward.
pub fn aligned_search_range(
    pairs: &[Correspondence],
    left: &Transform,
    right: &Transform,
    multiplier: f32,
) -> SearchRange {
    let offsets = pairs
        .iter()
        .map(|p| p.transformed(left, right))
        .filter(|p| p.left.is_finite() && p.right.is_finite())
        .map(|p| p.offset().as_vec2());
    SearchRange::enclosing(offsets)
        .grow(Vec2::ZERO)
        .scale(Vec2::splat(multiplier))
        .round_outward()
}
