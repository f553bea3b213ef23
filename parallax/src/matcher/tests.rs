use super::*;
use crate::testing::{flat, masked, noise_texture, shifted};
use common::Buffer2;
use glam::{IVec2, Vec2};

fn request<'a>(
    left: &'a MaskedImage,
    right: &'a MaskedImage,
    range: SearchRange,
    kernel: usize,
    cost: CostFunction,
) -> MatchRequest<'a> {
    MatchRequest {
        left,
        right,
        roi: PixelBox::from_size(left.width(), left.height()),
        search_range: range,
        kernel: [kernel, kernel],
        cost,
        budget: None,
    }
}

#[test]
fn test_candidates_cover_integer_offsets_in_row_order() {
    let image = masked(flat(4, 4, 1.0));
    let req = request(
        &image,
        &image,
        SearchRange::from_bounds(-1.5, 0.0, 0.0, 1.0),
        3,
        CostFunction::AbsoluteDifference,
    );
    assert_eq!(
        req.candidates(),
        vec![
            IVec2::new(-1, 0),
            IVec2::new(0, 0),
            IVec2::new(-1, 1),
            IVec2::new(0, 1)
        ]
    );
    assert_eq!(req.op_count(), 16.0 * 4.0 * 9.0);
}

#[test]
fn test_block_matcher_recovers_integer_shift() {
    let texture = noise_texture(40, 32, 3);
    let left = masked(texture.clone());
    let right = masked(shifted(&texture, 5, 2));
    let req = request(
        &left,
        &right,
        SearchRange::from_bounds(0.0, 0.0, 8.0, 4.0),
        5,
        CostFunction::AbsoluteDifference,
    );

    let field = BlockMatcher::default().correlate(&req).unwrap();
    assert_eq!(field.size(), (40, 32));

    for y in 2..(32 - 2 - 2) {
        for x in 2..(40 - 5 - 2) {
            assert_eq!(field.get(x, y).valid_offset(), Some(Vec2::new(5.0, 2.0)), "({x}, {y})");
        }
    }
    // True match outside the right crop.
    for y in 0..32 {
        for x in (40 - 5 - 2)..40 {
            assert!(!field.get(x, y).valid, "({x}, {y})");
        }
    }
}

#[test]
fn test_ncc_ignores_gain_and_bias() {
    let texture = noise_texture(36, 28, 4);
    let left = masked(texture.clone());
    let right = masked(shifted(&texture, 3, 0).map(|v| v * 2.0 + 10.0));
    let req = request(
        &left,
        &right,
        SearchRange::from_bounds(-4.0, -1.0, 6.0, 1.0),
        7,
        CostFunction::NormalizedCrossCorrelation,
    );

    let field = BlockMatcher::default().correlate(&req).unwrap();
    let valid: Vec<Vec2> = field.iter_valid().map(|(_, _, d)| d).collect();
    assert!(valid.len() > 200, "{} valid", valid.len());
    assert!(valid.iter().all(|d| *d == Vec2::new(3.0, 0.0)));
}

#[test]
fn test_flat_image_has_no_ncc_match() {
    let left = masked(flat(20, 20, 7.0));
    let req = request(
        &left,
        &left,
        SearchRange::from_bounds(-2.0, 0.0, 2.0, 0.0),
        5,
        CostFunction::NormalizedCrossCorrelation,
    );
    let field = BlockMatcher::default().correlate(&req).unwrap();
    assert_eq!(field.valid_count(), 0);
}

#[test]
fn test_subpixel_refinement_on_smooth_texture() {
    let texture = |x: f32| 100.0 + 40.0 * (0.3 * x).sin();
    let left = masked(Buffer2::from_fn(48, 24, |x, _| texture(x as f32)));
    let right = masked(Buffer2::from_fn(48, 24, |x, _| texture(x as f32 - 3.4)));
    let req = request(
        &left,
        &right,
        SearchRange::from_bounds(0.0, 0.0, 6.0, 0.0),
        7,
        CostFunction::SquaredDifference,
    );

    let field = BlockMatcher::new(true).correlate(&req).unwrap();
    let valid: Vec<Vec2> = field.iter_valid().map(|(_, _, d)| d).collect();
    assert!(valid.len() > 300, "{} valid", valid.len());
    let mean_x = valid.iter().map(|d| d.x).sum::<f32>() / valid.len() as f32;
    assert!((mean_x - 3.4).abs() < 0.15, "mean dx {mean_x}");
    assert!(valid.iter().all(|d| d.y.abs() < 0.1));
}

#[test]
fn test_roi_limits_output() {
    let texture = noise_texture(30, 30, 5);
    let left = masked(texture.clone());
    let right = masked(shifted(&texture, 2, 0));
    let mut req = request(
        &left,
        &right,
        SearchRange::from_bounds(0.0, 0.0, 4.0, 0.0),
        5,
        CostFunction::AbsoluteDifference,
    );
    req.roi = PixelBox::new(10, 8, 6, 4);

    let field = BlockMatcher::default().correlate(&req).unwrap();
    assert_eq!(field.size(), (6, 4));
    assert_eq!(field.valid_count(), 24);
    assert!(field.iter_valid().all(|(_, _, d)| d == Vec2::new(2.0, 0.0)));
}

#[test]
fn test_exhausted_budget_returns_invalid_field() {
    let texture = noise_texture(24, 24, 6);
    let left = masked(texture.clone());
    let right = masked(shifted(&texture, 2, 0));
    let mut req = request(
        &left,
        &right,
        SearchRange::from_bounds(0.0, 0.0, 4.0, 0.0),
        5,
        CostFunction::AbsoluteDifference,
    );
    req.budget = Some(TimeBudget::new(1.0, 1.0));

    let field = BlockMatcher::default().correlate(&req).unwrap();
    assert_eq!(field.size(), (24, 24));
    assert_eq!(field.valid_count(), 0);
}

#[test]
fn test_budget_estimate() {
    let budget = TimeBudget::new(2.0, 1e-3);
    assert!(budget.allows(1500.0));
    assert!(!budget.allows(2500.0));
}

#[test]
fn test_bad_requests_are_errors() {
    let image = masked(flat(10, 10, 1.0));
    let mut req = request(
        &image,
        &image,
        SearchRange::from_bounds(0.0, 0.0, 1.0, 0.0),
        4,
        CostFunction::AbsoluteDifference,
    );
    assert!(matches!(
        BlockMatcher::default().correlate(&req),
        Err(crate::Error::Matcher(_))
    ));

    req.kernel = [3, 3];
    req.roi = PixelBox::new(5, 5, 10, 10);
    assert!(BlockMatcher::default().correlate(&req).is_err());
}

#[test]
fn test_calibration_measures_positive_rate() {
    let texture = noise_texture(80, 80, 7);
    let left = masked(texture.clone());
    let right = masked(shifted(&texture, 3, 0));
    let rate = calibrate_seconds_per_op(
        &BlockMatcher::default(),
        &left,
        &right,
        [5, 5],
        CostFunction::AbsoluteDifference,
    )
    .unwrap();
    assert!(rate.is_finite() && rate >= 0.0);
}
