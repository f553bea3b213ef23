//! Global search range estimation.
//!
//! Two sources: the offsets of sparse feature correspondences
//! ([`HistogramRangeEstimator`]) and a dense low-resolution correlation
//! ([`CorrelationRangeEstimator`]).

mod histogram;


use glam::Vec2;

use crate::config::CostFunction;
use crate::correspondence::Correspondence;
use crate::disparity::DisparityField;
use crate::error::{Error, Result};
use crate::math::{PixelBox, SearchRange};
use crate::matcher::{MatchRequest, Matcher};
use crate::raster::MaskedImage;
use crate::transform::Transform;

pub use histogram::HistogramRangeEstimator;

/// Drops correspondences that cannot be real ground points, typically by
/// triangulating them against elevation limits. Pairs are given in
/// full-resolution coordinates.
pub trait CorrespondenceFilter: Send + Sync {
    fn accepts(&self, pair: &Correspondence) -> bool;
}

/// Global transforms the input images were aligned with.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentMatrices {
    pub left: Transform,
    pub right: Transform,
}

impl AlignmentMatrices {
    /// Maps pairs into the aligned frames. Pairs sent to infinity keep
    /// their coordinates.
    pub fn apply(&self, pairs: &[Correspondence]) -> Vec<Correspondence> {
        pairs
            .iter()
            .map(|pair| {
                let aligned = pair.transformed(&self.left, &self.right);
                if aligned.left.is_finite() && aligned.right.is_finite() {
                    aligned
                } else {
                    *pair
                }
            })
            .collect()
    }
}

/// Correspondences feeding the histogram estimate.
#[derive(Clone, Copy)]
pub struct CorrespondenceInputs<'a> {
    pub pairs: &'a [Correspondence],
    /// Resolution of the pairs relative to the full images.
    pub scale: f64,
    pub alignment: Option<&'a AlignmentMatrices>,
    pub filter: Option<&'a dyn CorrespondenceFilter>,
}

impl<'a> CorrespondenceInputs<'a> {
    pub fn new(pairs: &'a [Correspondence], scale: f64) -> Self {
        Self {
            pairs,
            scale,
            alignment: None,
            filter: None,
        }
    }

    /// Full-resolution pairs after alignment and filtering. Aligned pairs
    /// are already at full resolution.
    fn prepared(&self) -> Vec<Correspondence> {
        let (pairs, scale) = match self.alignment {
            Some(alignment) => (alignment.apply(self.pairs), 1.0),
            None => (self.pairs.to_vec(), self.scale),
        };
        let inv = 1.0 / scale;
        pairs
            .into_iter()
            .map(|p| Correspondence::new(p.left * inv, p.right * inv))
            .filter(|p| self.filter.is_none_or(|f| f.accepts(p)))
            .collect()
    }
}

impl HistogramRangeEstimator {
    /// Inflated percentile window of the prepared offsets, rounded outward
    /// to whole pixels.
    pub fn estimate(&self, inputs: &CorrespondenceInputs<'_>) -> Result<SearchRange> {
        let pairs = inputs.prepared();
        let offsets: Vec<Vec2> = pairs.iter().map(|p| p.offset().as_vec2()).collect();
        let Some(window) = self.window(&offsets) else {
            return Err(Error::DegenerateGeometry(format!(
                "no correspondences left after filtering {} pairs",
                inputs.pairs.len()
            )));
        };
        let range = window.round_outward();
        tracing::info!(pairs = pairs.len(), range = %range, "search range from correspondences");
        Ok(range)
    }
}

/// Full-resolution range covered by the valid offsets of a low-resolution
/// field; `None` when nothing is valid.
pub fn range_from_seed(seed: &DisparityField, sub_scale: Vec2) -> Option<SearchRange> {
    let range = seed.range();
    (!range.is_empty()).then(|| range.scale_outward(Vec2::ONE / sub_scale))
}

/// Runs a matcher on subsampled images and keeps the extent of what it
/// found.
pub struct CorrelationRangeEstimator<'a> {
    pub matcher: &'a dyn Matcher,
    pub kernel: [usize; 2],
    pub cost: CostFunction,
}

impl CorrelationRangeEstimator<'_> {
    /// `window` is a full-resolution range known to hold the answer;
    /// `sub_scale` is the subsampled size over the full size.
    pub fn estimate(
        &self,
        left_sub: &MaskedImage,
        right_sub: &MaskedImage,
        window: &SearchRange,
        sub_scale: Vec2,
    ) -> Result<SearchRange> {
        let request = MatchRequest {
            left: left_sub,
            right: right_sub,
            roi: PixelBox::from_size(left_sub.width(), left_sub.height()),
            search_range: window.scale_outward(sub_scale),
            kernel: self.kernel,
            cost: self.cost,
            budget: None,
        };
        let field = self.matcher.correlate(&request)?;
        range_from_seed(&field, sub_scale).ok_or_else(|| {
            Error::DegenerateGeometry("low-resolution correlation found no valid offset".into())
        })
    }
}
