use super::*;
use crate::math::DMat3;
use crate::testing::{masked, noise_texture};
use glam::Vec2;

#[test]
fn test_identity_warp_is_exact() {
    let image = masked(noise_texture(20, 12, 1));
    let out = warp_masked(&image, &Transform::identity(), image.size()).unwrap();
    assert_eq!(out, image);
}

#[test]
fn test_translation_warp_samples_bilinear() {
    let image = masked(Buffer2::from_fn(10, 10, |x, y| (x * 10 + y) as f32));
    let t = Transform::translation(DVec2::new(0.5, 2.0));
    let out = warp_masked(&image, &t, (10, 10)).unwrap();

    // out(q) = image(q - (0.5, 2)); the image is linear so bilinear is exact.
    assert!((out.pixels[(3, 5)] - (2.5 * 10.0 + 3.0)).abs() < 1e-4);
    // Source column -0.5 needs a tap at x = -1.
    assert!(!out.is_valid(0, 5));
    // Source rows below zero.
    assert!(!out.is_valid(4, 1));
    assert!(out.is_valid(9, 9));
}

#[test]
fn test_invalid_source_pixel_spreads_to_its_footprint() {
    let mut pixels = Buffer2::new_filled(8, 8, 1.0f32);
    pixels[(4, 4)] = f32::NAN;
    let t = Transform::translation(DVec2::new(0.5, 0.0));
    let out = warp_masked(&masked(pixels), &t, (8, 8)).unwrap();
    assert!(!out.is_valid(4, 4));
    assert!(!out.is_valid(5, 4));
    assert!(out.is_valid(6, 4));
    assert!(out.is_valid(4, 3));
}

#[test]
fn test_singular_transform_is_rejected() {
    let image = masked(noise_texture(4, 4, 2));
    let flat = Transform::affine([1.0, 2.0, 0.0, 2.0, 4.0, 0.0]);
    assert!(warp_masked(&image, &flat, (4, 4)).is_none());
}

/// Disparity a matcher would report in the warped frame when the native
/// disparity is `native` everywhere.
fn warped_frame_disparity(
    left: &Transform,
    right: &Transform,
    native: DVec2,
    size: (usize, usize),
) -> DisparityField {
    let left_inv = left.inverse().unwrap();
    DisparityField::from_fn(size.0, size.1, |x, y| {
        let q = DVec2::new(x as f64, y as f64);
        let p = left_inv.apply(q);
        let r = right.apply(p + native);
        DisparityPixel::new((r - q).as_vec2())
    })
}

#[test]
fn test_reconcile_inverts_affine_alignment() {
    let left = Transform::affine([0.98, -0.17, 6.0, 0.17, 0.98, -3.0]);
    let right = Transform::affine([1.05, 0.02, -20.0, -0.01, 0.95, 4.0]);
    let native = DVec2::new(12.0, -1.5);
    let warped = warped_frame_disparity(&left, &right, native, (80, 80));

    let back = reconcile_disparity(&warped, &left, &right, (48, 48)).unwrap();

    let mut checked = 0;
    for (_, _, d) in back.iter_valid() {
        assert!((d - native.as_vec2()).length() < 1e-3, "{d}");
        checked += 1;
    }
    assert!(checked > 48 * 48 / 2, "only {checked} pixels mapped back");
}

#[test]
fn test_reconcile_homography_within_one_pixel() {
    let left = Transform::identity();
    let right = Transform::homography(DMat3::from_rows(
        [1.01, 0.02, -12.0],
        [0.0, 0.99, 1.0],
        [1e-4, 5e-5, 1.0],
    ));
    let native = DVec2::new(12.0, 0.0);
    let warped = warped_frame_disparity(&left, &right, native, (64, 64));

    let back = reconcile_disparity(&warped, &left, &right, (64, 64)).unwrap();

    assert_eq!(back.valid_count(), 64 * 64);
    for (_, _, d) in back.iter_valid() {
        assert!((d - Vec2::new(12.0, 0.0)).length() < 1.0);
    }
}

#[test]
fn test_reconcile_keeps_invalid_samples_invalid() {
    let mut warped = DisparityField::from_fn(10, 10, |_, _| DisparityPixel::new(Vec2::new(3.0, 0.0)));
    warped.set(5, 5, DisparityPixel::INVALID);
    let id = Transform::identity();
    let back = reconcile_disparity(&warped, &id, &id, (12, 10)).unwrap();
    assert!(!back.get(5, 5).valid);
    assert!(!back.get(11, 0).valid);
    assert_eq!(back.get(4, 4).offset, Vec2::new(3.0, 0.0));
    assert_eq!(back.valid_count(), 99);
}
