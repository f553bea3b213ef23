use super::*;
use crate::diagnostics::NullDiagnostics;
use crate::testing::{flat, masked, noise_texture, shifted};
use common::test_utils::test_output_path;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn finder_config() -> FinderConfig {
    FinderConfig {
        features_per_tile: 200,
        ..FinderConfig::default()
    }
}

#[test]
fn test_harris_finds_corners_on_texture_only() {
    let extractor = HarrisPatchExtractor::default();
    let textured = masked(noise_texture(96, 96, 1));
    let kps = extractor.extract(&textured, 100);
    assert!(kps.len() >= 50, "only {} keypoints", kps.len());
    assert!(kps.len() <= 100);
    for kp in &kps {
        let norm: f32 = kp.descriptor.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    let blank = masked(flat(96, 96, 7.0));
    assert!(extractor.extract(&blank, 100).is_empty());
}

#[test]
fn test_keypoint_patches_avoid_invalid_pixels() {
    let mut pixels = noise_texture(80, 80, 2);
    for y in 0..80 {
        for x in 40..80 {
            pixels[(x, y)] = f32::NAN;
        }
    }
    let extractor = HarrisPatchExtractor::default();
    let patch = HarrisConfig::default().patch_radius as f64;
    let kps = extractor.extract(&masked(pixels), 200);
    assert!(!kps.is_empty());
    assert!(kps.iter().all(|kp| kp.position.x + patch < 40.0));
}

#[test]
fn test_match_identical_keypoints() {
    let image = masked(noise_texture(64, 64, 3));
    let kps = HarrisPatchExtractor::default().extract(&image, 60);
    let matches = match_descriptors(&kps, &kps, 0.8);
    assert_eq!(matches.len(), kps.len());
    assert!(matches.iter().all(|m| m.left == m.right));
}

#[test]
fn test_finder_recovers_shift() {
    let left = noise_texture(128, 128, 4);
    let right = shifted(&left, 7, 3);
    let extractor = HarrisPatchExtractor::default();
    let finder = CorrespondenceFinder::new(&extractor, finder_config());
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let pairs = finder
        .find(&masked(left), &masked(right), "shift", &NullDiagnostics, &mut rng)
        .unwrap();

    assert!(pairs.len() >= 20, "only {} pairs", pairs.len());
    let exact = pairs
        .iter()
        .filter(|p| p.offset() == DVec2::new(7.0, 3.0))
        .count();
    assert!(exact * 10 >= pairs.len() * 9, "{exact} of {} exact", pairs.len());
}

#[test]
fn test_finder_fails_without_texture() {
    let extractor = HarrisPatchExtractor::default();
    let finder = CorrespondenceFinder::new(&extractor, finder_config());
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    let blank = masked(flat(64, 64, 1.0));
    assert!(finder
        .find(&blank, &blank, "blank", &NullDiagnostics, &mut rng)
        .is_none());
}

#[test]
fn test_match_file_round_trip() {
    let path = test_output_path("features_pairs.match");
    let pairs = vec![
        Correspondence::new(DVec2::new(1.5, 2.0), DVec2::new(13.5, 2.25)),
        Correspondence::new(DVec2::new(-4.0, 100.0), DVec2::new(8.0, 99.0)),
    ];
    io::write_matches(&path, &pairs).unwrap();
    assert_eq!(io::read_matches(&path).unwrap(), pairs);

    std::fs::write(&path, b"PXMT").unwrap();
    assert!(matches!(
        io::read_matches(&path),
        Err(crate::Error::Format { .. })
    ));
}

/// Serves `left` for the dark image and `right` for the bright one, with
/// one-hot descriptors so pair `i` matches pair `i`.
struct ScriptedExtractor {
    left: Vec<DVec2>,
    right: Vec<DVec2>,
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

const CONSENSUS_SHIFT: DVec2 = DVec2::new(60.0, 40.0);

/// `inliers` pairs shifted by `CONSENSUS_SHIFT`, then `outliers` pairs
/// whose offsets stay more than 16 px away from it.
fn mixed_extractor(inliers: usize, outliers: usize) -> ScriptedExtractor {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for i in 0..inliers {
        let p = DVec2::new(10.0 + 15.0 * (i % 5) as f64, 10.0 + 13.0 * (i / 5) as f64);
        left.push(p);
        right.push(p + CONSENSUS_SHIFT);
    }
    for i in 0..outliers {
        let p = DVec2::new(7.0 + 17.0 * (i % 5) as f64, 120.0 + 11.0 * (i / 5) as f64);
        let offset = DVec2::new(
            ((i * 37) % 90) as f64 - 45.0,
            ((i * 53) % 70) as f64 - 35.0,
        );
        left.push(p);
        right.push(p + offset);
    }
    ScriptedExtractor { left, right }
}

#[test]
fn test_finder_needs_half_of_the_matches_as_inliers() {
    let dark = masked(flat(32, 32, 1.0));
    let bright = masked(flat(32, 32, 2.0));
    let find = |extractor: &ScriptedExtractor| {
        let finder = CorrespondenceFinder::new(extractor, finder_config());
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        finder.find(&dark, &bright, "mixed", &NullDiagnostics, &mut rng)
    };

    let pairs = find(&mixed_extractor(20, 10)).expect("majority consensus");
    assert_eq!(pairs.len(), 20);
    assert!(pairs.iter().all(|p| (p.offset() - CONSENSUS_SHIFT).length() < 1e-6));

    assert!(find(&mixed_extractor(10, 20)).is_none());
}
