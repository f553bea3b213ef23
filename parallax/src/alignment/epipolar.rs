use glam::DVec2;
use rand::Rng;

use crate::correspondence::Correspondence;
use crate::math::{DMat3, PixelBox};
use crate::ransac::{AffineFundamentalFit, RansacParams, RobustModelFitter};
use crate::transform::Transform;

/// Left and right transforms that make epipolar lines horizontal and
/// corresponding rows coincide, with the canvas both render into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpipolarRectification {
    pub left: Transform,
    pub right: Transform,
    pub size: (usize, usize),
}

pub fn rectify<R: Rng + ?Sized>(
    pairs: &[Correspondence],
    left_size: (usize, usize),
    right_size: (usize, usize),
    params: RansacParams,
    rng: &mut R,
) -> Option<EpipolarRectification> {
    let fit = match RobustModelFitter::new(params).fit(&AffineFundamentalFit, pairs, rng) {
        Ok(fit) => fit,
        Err(reason) => {
            tracing::debug!(%reason, "affine fundamental fit failed");
            return None;
        }
    };
    let inliers = fit.inlier_pairs(pairs);

    let left_rot = epipolar_rotation(fit.model.left_coefficients())?;
    let right_rot = epipolar_rotation(fit.model.right_coefficients())?;

    let mut right = right_rot;
    solve_y_scaling(&inliers, &left_rot, &mut right);
    solve_x_shear(&inliers, &left_rot, &mut right);

    let left_t = Transform::affine(affine_params(&left_rot));
    let right_t = Transform::affine(affine_params(&right));

    let footprint = |t: &Transform, (w, h): (usize, usize)| {
        PixelBox::enclosing(PixelBox::from_size(w, h).corners().map(|c| t.apply(c)))
    };
    let canvas = footprint(&left_t, left_size).intersect(&footprint(&right_t, right_size));
    if canvas.is_empty() {
        return None;
    }
    let shift = -canvas.min.as_dvec2();
    Some(EpipolarRectification {
        left: left_t.then_translate(shift),
        right: right_t.then_translate(shift),
        size: canvas.size(),
    })
}

/// Rotation taking the epipolar direction of one image onto the x axis.
/// `coefficients` are the fundamental-matrix terms multiplying that
/// image's coordinates.
fn epipolar_rotation(coefficients: DVec2) -> Option<DMat3> {
    let norm = coefficients.length();
    if !(norm > f64::EPSILON) {
        return None;
    }
    let mut dir = DVec2::new(-coefficients.y, coefficients.x);
    if dir.x < 0.0 {
        dir = -dir;
    }
    dir.y = -dir.y;
    let (c, s) = (dir.x / norm, dir.y / norm);
    Some(DMat3::from_rows([c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]))
}

fn affine_params(m: &DMat3) -> [f64; 6] {
    let a = m.as_array();
    [a[0], a[1], a[2], a[3], a[4], a[5]]
}

/// Rescales and shifts the right rows so `y_left ≈ s * y_right + t`.
fn solve_y_scaling(pairs: &[Correspondence], left: &DMat3, right: &mut DMat3) {
    let n = pairs.len() as f64;
    if n == 0.0 {
        return;
    }
    let (mut sr, mut srr, mut sl, mut slr) = (0.0, 0.0, 0.0, 0.0);
    for p in pairs {
        let yl = left.transform_point(p.left).y;
        let yr = right.transform_point(p.right).y;
        sr += yr;
        srr += yr * yr;
        sl += yl;
        slr += yl * yr;
    }
    let det = srr * n - sr * sr;
    let (s, t) = if det.abs() > 1e-9 * n * n {
        ((slr * n - sr * sl) / det, (srr * sl - sr * slr) / det)
    } else {
        (1.0, (sl - sr) / n)
    };

    let m = right.as_array();
    let row1 = [s * m[3] + t * m[6], s * m[4] + t * m[7], s * m[5] + t * m[8]];
    right[3] = row1[0];
    right[4] = row1[1];
    right[5] = row1[2];
}

/// Mixes the right columns so `x_left ≈ c * x_right + e * y_right + f`.
fn solve_x_shear(pairs: &[Correspondence], left: &DMat3, right: &mut DMat3) {
    let n = pairs.len() as f64;
    if n == 0.0 {
        return;
    }
    let mut normal = [0.0; 9];
    let mut rhs = [0.0; 3];
    for p in pairs {
        let xl = left.transform_point(p.left).x;
        let r = right.transform_point(p.right);
        let v = [r.x, r.y, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                normal[i * 3 + j] += v[i] * v[j];
            }
            rhs[i] += v[i] * xl;
        }
    }
    let [c, e, f] = match DMat3::from_array(normal).inverse() {
        Some(inv) if inv.is_finite() => {
            let m = inv.as_array();
            [
                m[0] * rhs[0] + m[1] * rhs[1] + m[2] * rhs[2],
                m[3] * rhs[0] + m[4] * rhs[1] + m[5] * rhs[2],
                m[6] * rhs[0] + m[7] * rhs[1] + m[8] * rhs[2],
            ]
        }
        _ => {
            let mean_x: f64 = pairs
                .iter()
                .map(|p| left.transform_point(p.left).x - right.transform_point(p.right).x)
                .sum::<f64>()
                / n;
            [1.0, 0.0, mean_x]
        }
    };

    let m = right.to_array();
    for k in 0..3 {
        right[k] = c * m[k] + e * m[3 + k] + f * m[6 + k];
    }
}
