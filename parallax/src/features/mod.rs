//! Keypoint detection, descriptor matching and geometric filtering of the
//! resulting correspondences.

pub mod harris;
pub mod io;

#[cfg(test)]
mod tests;

use glam::DVec2;
use rand::Rng;

use crate::correspondence::Correspondence;
use crate::diagnostics::{DiagnosticsSink, MatchStage};
use crate::raster::MaskedImage;
use crate::ransac::{FittingModel, HomographyFit, RansacParams, RobustModelFitter};

pub use harris::{HarrisConfig, HarrisPatchExtractor};

/// A detected interest point with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub position: DVec2,
    pub response: f32,
    /// Unit-length descriptor vector.
    pub descriptor: Vec<f32>,
}

/// Detects and describes interest points.
pub trait FeatureExtractor: Send + Sync {
    /// Returns at most `max_features` keypoints, spread over the image.
    fn extract(&self, image: &MaskedImage, max_features: usize) -> Vec<Keypoint>;
}

/// Nearest-neighbour descriptor matching with Lowe's ratio test and a
/// mutual-best check.
pub fn match_descriptors(left: &[Keypoint], right: &[Keypoint], ratio: f32) -> Vec<Correspondence> {
    if left.is_empty() || right.is_empty() {
        return Vec::new();
    }

    let dist = |a: &Keypoint, b: &Keypoint| -> f32 {
        a.descriptor
            .iter()
            .zip(&b.descriptor)
            .map(|(x, y)| (x - y) * (x - y))
            .sum()
    };

    let best_left_for_right: Vec<usize> = right
        .iter()
        .map(|r| {
            left.iter()
                .enumerate()
                .map(|(i, l)| (i, dist(l, r)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(usize::MAX, |(i, _)| i)
        })
        .collect();

    let ratio_sq = ratio * ratio;
    let mut matches = Vec::new();
    for (li, l) in left.iter().enumerate() {
        let mut best = (usize::MAX, f32::INFINITY);
        let mut second = f32::INFINITY;
        for (ri, r) in right.iter().enumerate() {
            let d = dist(l, r);
            if d < best.1 {
                second = best.1;
                best = (ri, d);
            } else if d < second {
                second = d;
            }
        }
        let (ri, d1) = best;
        if ri == usize::MAX || best_left_for_right[ri] != li {
            continue;
        }
        if second.is_finite() && d1 >= ratio_sq * second {
            continue;
        }
        matches.push(Correspondence::new(l.position, right[ri].position));
    }
    matches
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinderConfig {
    /// Keypoints requested per image.
    pub features_per_tile: usize,
    /// Lowe ratio for descriptor matching.
    pub ratio: f32,
    /// Inlier bound of the homography filter, in pixels.
    pub inlier_threshold: f64,
    pub ransac_iterations: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            features_per_tile: 400,
            ratio: 0.8,
            inlier_threshold: 10.0,
            ransac_iterations: 100,
        }
    }
}

/// Finds correspondences between two patches: detect, match, then keep the
/// matches a single loose homography can explain.
pub struct CorrespondenceFinder<'a> {
    extractor: &'a dyn FeatureExtractor,
    config: FinderConfig,
}

impl<'a> CorrespondenceFinder<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, config: FinderConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// `None` when nothing matched or the homography filter found no
    /// consensus.
    pub fn find<R: Rng + ?Sized>(
        &self,
        left: &MaskedImage,
        right: &MaskedImage,
        label: &str,
        diagnostics: &dyn DiagnosticsSink,
        rng: &mut R,
    ) -> Option<Vec<Correspondence>> {
        let left_kp = self.extractor.extract(left, self.config.features_per_tile);
        let right_kp = self.extractor.extract(right, self.config.features_per_tile);
        let raw = match_descriptors(&left_kp, &right_kp, self.config.ratio);
        tracing::debug!(
            label,
            left = left_kp.len(),
            right = right_kp.len(),
            matched = raw.len(),
            "descriptor matching"
        );
        diagnostics.correspondences(label, MatchStage::Raw, &raw);
        if raw.is_empty() {
            return None;
        }

        let fitter = RobustModelFitter::new(RansacParams {
            iterations: self.config.ransac_iterations,
            inlier_threshold: self.config.inlier_threshold,
            min_inliers: (raw.len() / 2).max(HomographyFit::MIN_SAMPLES),
        });
        match fitter.fit(&HomographyFit, &raw, rng) {
            Ok(fit) => {
                let filtered = fit.inlier_pairs(&raw);
                diagnostics.correspondences(label, MatchStage::Filtered, &filtered);
                Some(filtered)
            }
            Err(reason) => {
                tracing::debug!(label, %reason, "homography filter rejected all matches");
                None
            }
        }
    }
}
