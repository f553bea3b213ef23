use super::*;
use common::test_utils::test_output_path;
use glam::{IVec2, Vec2};

#[test]
fn test_default_config_is_valid() {
    Config::default().validate().unwrap();
}

#[test]
fn test_even_kernel_is_rejected() {
    let config = Config {
        kernel_size: [20, 21],
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_conflicting_low_res_switches_are_rejected() {
    let config = Config {
        compute_low_res_only: true,
        skip_low_res: true,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_empty_user_range_is_rejected() {
    let config = Config {
        search_range: Some(SearchRange::from_bounds(5.0, 0.0, -5.0, 0.0)),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_tile_size_rounds_up_to_multiple_of_16() {
    let mut config = Config::default();
    for (requested, effective) in [(1, 16), (16, 16), (1000, 1008), (1024, 1024)] {
        config.tile_size = requested;
        assert_eq!(config.effective_tile_size(), effective);
    }
}

#[test]
fn test_aggregating_algorithm_needs_whole_image_tile() {
    let config = Config {
        algorithm: CorrelationAlgorithm::SemiGlobal,
        tile_size: 512,
        ..Config::default()
    };
    assert!(matches!(
        config.check_tile_size((600, 400)),
        Err(Error::ConfigMismatch(_))
    ));
    config.check_tile_size((512, 300)).unwrap();

    let window = Config {
        tile_size: 512,
        ..Config::default()
    };
    window.check_tile_size((5000, 5000)).unwrap();
}

#[test]
fn test_output_numeric_follows_algorithm() {
    assert_eq!(
        CorrelationAlgorithm::Window.output_numeric(),
        DisparityNumeric::Integer
    );
    assert_eq!(
        CorrelationAlgorithm::MoreGlobal.output_numeric(),
        DisparityNumeric::Float
    );
}

#[test]
fn test_seed_rule_defaults_to_neighbour_threshold() {
    let rule = OutlierConfig::default().seed_rule();
    let OutlierRejection::Threshold {
        half_kernel,
        threshold,
        min_match_fraction,
    } = rule
    else {
        panic!("expected threshold rule, got {rule:?}");
    };
    assert_eq!(half_kernel, 1);
    assert!((threshold - 2.0).abs() < 1e-6);
    assert!((min_match_fraction - 0.5).abs() < 1e-6);
}

#[test]
fn test_seed_rule_switches_to_quantile() {
    let outliers = OutlierConfig {
        quantile_multiple: 3.0,
        ..OutlierConfig::default()
    };
    assert_eq!(
        outliers.seed_rule(),
        OutlierRejection::Quantile {
            percentile: 0.85,
            multiple: 3.0
        }
    );
}

#[test]
fn test_ransac_threshold_defaults_per_mode() {
    let piecewise = PiecewiseConfig::default();
    assert_eq!(piecewise.ransac_threshold_for(AlignmentMode::AffineEpipolar), 20.0);
    assert_eq!(piecewise.ransac_threshold_for(AlignmentMode::Homography), 3.0);

    let fixed = PiecewiseConfig {
        ransac_threshold: Some(7.5),
        ..piecewise
    };
    assert_eq!(fixed.ransac_threshold_for(AlignmentMode::AffineEpipolar), 7.5);
}

#[test]
fn test_user_range_follows_single_crop() {
    let range = SearchRange::from_bounds(-10.0, -2.0, 10.0, 2.0);
    let left_only = Config {
        search_range: Some(range),
        left_crop: Some(PixelBox::new(100, 40, 50, 50)),
        ..Config::default()
    };
    assert_eq!(
        left_only.crop_adjusted_search_range(),
        Some(SearchRange::from_bounds(90.0, 38.0, 110.0, 42.0))
    );

    let right_only = Config {
        search_range: Some(range),
        right_crop: Some(PixelBox::new(100, 40, 50, 50)),
        ..Config::default()
    };
    assert_eq!(
        right_only.crop_adjusted_search_range(),
        Some(SearchRange::from_bounds(-110.0, -42.0, -90.0, -38.0))
    );

    let both = Config {
        left_crop: right_only.right_crop,
        ..right_only.clone()
    };
    assert_eq!(both.crop_adjusted_search_range(), Some(range));
    assert_eq!(Config::default().crop_adjusted_search_range(), None);
}

#[test]
fn test_yaml_round_trip() {
    let config = Config {
        alignment: AlignmentMode::Homography,
        search_range_limit: Some(SearchRange::new(Vec2::new(-64.0, -8.0), Vec2::new(64.0, 8.0))),
        left_crop: Some(PixelBox::from_corners(IVec2::new(0, 0), IVec2::new(640, 480))),
        ransac_seed: Some(42),
        ..Config::default()
    };
    let path = test_output_path("config_round_trip.yaml");
    config.save(&path).unwrap();
    assert_eq!(Config::from_file(&path).unwrap(), config);
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let path = test_output_path("config_partial.yaml");
    std::fs::write(
        &path,
        "alignment: affine_epipolar\n\
         kernel_size: [7, 7]\n\
         search_range:\n  min: [-10.0, 0.0]\n  max: [10.0, 2.0]\n\
         piecewise:\n  margin: 30\n",
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.alignment, AlignmentMode::AffineEpipolar);
    assert_eq!(config.kernel_size, [7, 7]);
    assert_eq!(config.piecewise.margin, 30);
    assert_eq!(config.piecewise.min_misalignment, 3.0);
    assert_eq!(
        config.search_range,
        Some(SearchRange::from_bounds(-10.0, 0.0, 10.0, 2.0))
    );
    assert_eq!(config.tile_size, 1024);
}

#[test]
fn test_invalid_file_is_rejected_after_loading() {
    let path = test_output_path("config_invalid.json");
    std::fs::write(&path, r#"{"kernel_size": [4, 4]}"#).unwrap();
    assert!(matches!(
        Config::from_file(&path),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_modes_use_snake_case_names() {
    let value = serde_json::to_value(Config {
        seed_mode: SeedMode::External,
        alignment: AlignmentMode::AffineEpipolar,
        cost_function: CostFunction::SquaredDifference,
        algorithm: CorrelationAlgorithm::SemiGlobal,
        ..Config::default()
    })
    .unwrap();
    assert_eq!(value["seed_mode"], "external");
    assert_eq!(value["alignment"], "affine_epipolar");
    assert_eq!(value["cost_function"], "squared_difference");
    assert_eq!(value["algorithm"], "semi_global");
}
