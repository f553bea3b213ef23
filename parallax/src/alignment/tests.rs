use glam::DVec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::diagnostics::NullDiagnostics;
use crate::features::Keypoint;
use crate::testing::{flat, masked};

/// Hands out fixed keypoints: `left` for the dark image, `right` for the
/// bright one. Descriptors are one-hot so pair `i` always matches pair `i`.
struct ScriptedExtractor {
    left: Vec<DVec2>,
    right: Vec<DVec2>,
}

impl ScriptedExtractor {
    fn new(pairs: &[Correspondence]) -> Self {
        Self {
            left: pairs.iter().map(|p| p.left).collect(),
            right: pairs.iter().map(|p| p.right).collect(),
        }
    }
}

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&self, image: &MaskedImage, max_features: usize) -> Vec<Keypoint> {
        let points = if image.pixels[(0, 0)] < 1.5 {
            &self.left
        } else {
            &self.right
        };
        let n = points.len();
        points
            .iter()
            .take(max_features)
            .enumerate()
            .map(|(i, &position)| {
                let mut descriptor = vec![0.0; n];
                descriptor[i] = 1.0;
                Keypoint {
                    position,
                    response: 1.0,
                    descriptor,
                }
            })
            .collect()
    }
}

fn crops() -> (MaskedImage, MaskedImage) {
    (masked(flat(64, 64, 1.0)), masked(flat(64, 64, 2.0)))
}

fn grid_pairs(map: impl Fn(usize, DVec2) -> DVec2) -> Vec<Correspondence> {
    let mut pairs = Vec::new();
    for gy in 0..5 {
        for gx in 0..5 {
            let left = DVec2::new(8.0 + 11.0 * gx as f64, 6.0 + 12.0 * gy as f64);
            pairs.push(Correspondence::new(left, map(pairs.len(), left)));
        }
    }
    pairs
}

fn align(mode: AlignmentMode, pairs: &[Correspondence], caller: SearchRange) -> AlignmentOutcome {
    let extractor = ScriptedExtractor::new(pairs);
    let aligner = PiecewiseAligner::new(mode, PiecewiseConfig::default(), &extractor);
    let (left, right) = crops();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    aligner.align(&left, &right, &caller, "0_0", &NullDiagnostics, &mut rng)
}

#[test]
fn test_aligned_tile_keeps_identity_and_caller_range() {
    let pairs = grid_pairs(|_, l| l + DVec2::new(3.0, 1.0));
    let caller = SearchRange::from_bounds(-2.0, -1.0, 9.0, 1.0);

    let outcome = align(AlignmentMode::Homography, &pairs, caller);

    assert!(outcome.is_identity());
    assert_eq!(outcome.search_range, caller);
    assert_eq!(outcome.size, (64, 64));
}

#[test]
fn test_disabled_mode_never_aligns() {
    let pairs = grid_pairs(|_, l| l + DVec2::new(0.0, 9.0));
    let caller = SearchRange::from_bounds(0.0, 0.0, 4.0, 0.0);

    let outcome = align(AlignmentMode::None, &pairs, caller);

    assert!(outcome.is_identity());
    assert_eq!(outcome.search_range, caller);
}

#[test]
fn test_homography_mode_removes_vertical_shift() {
    let pairs = grid_pairs(|_, l| l + DVec2::new(4.0, 6.0));
    let caller = SearchRange::from_bounds(-20.0, -20.0, 20.0, 20.0);

    let outcome = align(AlignmentMode::Homography, &pairs, caller);

    assert!(!outcome.is_identity());
    assert!(outcome.left.is_identity());
    let mapped = outcome.right.apply(DVec2::new(14.0, 16.0));
    assert!((mapped - DVec2::new(10.0, 10.0)).length() < 1e-6, "{mapped}");
    assert_eq!(outcome.size, (64, 64));
    // Every aligned pair coincides, so only zero offset remains.
    assert_eq!(outcome.search_range, SearchRange::from_bounds(0.0, 0.0, 0.0, 0.0));
}

#[test]
fn test_implausible_scale_is_rejected() {
    let caller = SearchRange::from_bounds(-5.0, -5.0, 5.0, 5.0);
    for factor in [20.0, 0.05] {
        let pairs = grid_pairs(|_, l| l * factor);
        let outcome = align(AlignmentMode::Homography, &pairs, caller);
        assert!(outcome.is_identity(), "factor {factor} accepted");
        assert_eq!(outcome.search_range, caller);
    }
}

#[test]
fn test_evaluate_checks_determinant_before_residuals() {
    let pairs = grid_pairs(|_, l| l + DVec2::new(0.0, 4.0));
    let shrink = Transform::affine([0.05, 0.0, 0.0, 0.0, 0.05, 0.0]);

    let verdict = evaluate(&Transform::identity(), &shrink, &pairs, 4.0);
    match verdict {
        QualityVerdict::Rejected(Rejection::Determinant { side, determinant }) => {
            assert_eq!(side, Side::Right);
            assert!((determinant - 0.0025).abs() < 1e-12);
        }
        other => panic!("unexpected verdict {other:?}"),
    }

    let verdict = evaluate(&Transform::identity(), &Transform::identity(), &pairs, 4.0);
    assert!(matches!(
        verdict,
        QualityVerdict::Rejected(Rejection::NoImprovement { .. })
    ));

    let fix = Transform::translation(DVec2::new(0.0, -4.0));
    let verdict = evaluate(&Transform::identity(), &fix, &pairs, 4.0);
    assert_eq!(verdict, QualityVerdict::Accepted { mean_delta_y: 0.0 });
    assert!(verdict.is_accepted());
}

#[test]
fn test_determinant_bounds_are_exclusive_on_both_sides() {
    let pairs = grid_pairs(|_, l| l + DVec2::new(0.0, 4.0));
    let fix = Transform::translation(DVec2::new(0.0, -4.0));

    for determinant in [DETERMINANT_RANGE.0, DETERMINANT_RANGE.1] {
        let scaled = Transform::affine([determinant, 0.0, 0.0, 0.0, 1.0, 0.0]);

        let verdict = evaluate(&scaled, &fix, &pairs, 4.0);
        assert_eq!(
            verdict,
            QualityVerdict::Rejected(Rejection::Determinant {
                side: Side::Left,
                determinant,
            })
        );

        let verdict = evaluate(&Transform::identity(), &scaled, &pairs, 4.0);
        assert_eq!(
            verdict,
            QualityVerdict::Rejected(Rejection::Determinant {
                side: Side::Right,
                determinant,
            })
        );
    }

    let inside = Transform::affine([1.0, 0.0, 0.0, 0.0, 1.0, 4.0]);
    let verdict = evaluate(&inside, &Transform::identity(), &pairs, 4.0);
    assert!(verdict.is_accepted(), "{verdict:?}");
}

fn disparity_pattern(i: usize) -> f64 {
    ((i * 7) % 9) as f64
}

#[test]
fn test_rectify_levels_rows() {
    let pairs = grid_pairs(|i, l| l + DVec2::new(disparity_pattern(i), 5.0));
    let params = RansacParams {
        iterations: 200,
        inlier_threshold: 1.0,
        min_inliers: pairs.len() / 2,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(11);

    let rect = rectify(&pairs, (64, 64), (64, 64), params, &mut rng).expect("rectified");

    for p in &pairs {
        let t = p.transformed(&rect.left, &rect.right);
        assert!((t.left.y - t.right.y).abs() < 1e-6, "{t:?}");
    }
    assert!(rect.size.0 > 0 && rect.size.1 > 0);
    assert!(rect.size.0 <= 64 && rect.size.1 <= 64);
    let det = rect.right.linear_determinant().abs();
    assert!(det > DETERMINANT_RANGE.0 && det < DETERMINANT_RANGE.1);
}

#[test]
fn test_epipolar_mode_accepts_row_shift() {
    let pairs = grid_pairs(|i, l| l + DVec2::new(disparity_pattern(i), 5.0));
    let caller = SearchRange::from_bounds(-30.0, -30.0, 30.0, 30.0);

    let outcome = align(AlignmentMode::AffineEpipolar, &pairs, caller);

    assert!(!outcome.is_identity());
    let after: f64 = pairs
        .iter()
        .map(|p| {
            let t = p.transformed(&outcome.left, &outcome.right);
            (t.left.y - t.right.y).abs()
        })
        .sum::<f64>()
        / pairs.len() as f64;
    assert!(after < 0.5, "mean |dy| after alignment {after}");
    assert!(outcome.search_range.min.y <= 0.0 && outcome.search_range.max.y >= 0.0);
}

#[test]
fn test_aligned_search_range_holds_zero_and_scales() {
    let pairs = vec![
        Correspondence::new(DVec2::new(0.0, 0.0), DVec2::new(3.0, 0.5)),
        Correspondence::new(DVec2::new(5.0, 5.0), DVec2::new(9.0, 5.0)),
    ];
    let id = Transform::identity();

    let range = aligned_search_range(&pairs, &id, &id, 2.0);

    assert_eq!(range, SearchRange::from_bounds(0.0, 0.0, 8.0, 1.0));
}
