//! Model families for [`RobustModelFitter`](super::RobustModelFitter).
//!
//! Every model maps `pair.left` towards `pair.right`; callers that need the
//! opposite direction fit on [`Correspondence::swapped`] pairs.

use glam::DVec2;
use nalgebra::{DMatrix, SVD};

use super::FittingModel;
use crate::correspondence::Correspondence;
use crate::math::DMat3;
use crate::transform::Transform;

/// Projective transform estimated with the normalized DLT.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomographyFit;

impl FittingModel for HomographyFit {
    type Model = Transform;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, pairs: &[Correspondence]) -> Option<Transform> {
        estimate_homography(pairs)
    }

    fn residual(&self, model: &Transform, pair: &Correspondence) -> f64 {
        (model.apply(pair.left) - pair.right).length()
    }
}

/// Six-parameter affine transform estimated by least squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineFit;

impl FittingModel for AffineFit {
    type Model = Transform;
    const MIN_SAMPLES: usize = 3;

    fn fit(&self, pairs: &[Correspondence]) -> Option<Transform> {
        estimate_affine(pairs)
    }

    fn residual(&self, model: &Transform, pair: &Correspondence) -> f64 {
        (model.apply(pair.left) - pair.right).length()
    }
}

/// Affine fundamental matrix
///
/// ```text
/// | 0  0  a |
/// | 0  0  b |
/// | c  d  e |
/// ```
///
/// with `[xr yr 1] F [xl yl 1]^T = a*xr + b*yr + c*xl + d*yl + e = 0`
/// for every left/right pair. The vector `(a, b, c, d)` has unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineFundamental {
    pub matrix: DMat3,
}

impl AffineFundamental {
    /// Coefficients of the right coordinates, `(F02, F12)`.
    pub fn right_coefficients(&self) -> DVec2 {
        DVec2::new(self.matrix[2], self.matrix[5])
    }

    /// Coefficients of the left coordinates, `(F20, F21)`.
    pub fn left_coefficients(&self) -> DVec2 {
        DVec2::new(self.matrix[6], self.matrix[7])
    }

    /// Signed algebraic distance in the 4-D joint space.
    pub fn distance(&self, pair: &Correspondence) -> f64 {
        let r = self.right_coefficients();
        let l = self.left_coefficients();
        let norm = (r.length_squared() + l.length_squared()).sqrt();
        (r.dot(pair.right) + l.dot(pair.left) + self.matrix[8]) / norm
    }
}

/// Gold-standard linear estimate of the affine fundamental matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineFundamentalFit;

impl FittingModel for AffineFundamentalFit {
    type Model = AffineFundamental;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, pairs: &[Correspondence]) -> Option<AffineFundamental> {
        estimate_affine_fundamental(pairs)
    }

    fn residual(&self, model: &AffineFundamental, pair: &Correspondence) -> f64 {
        model.distance(pair).abs()
    }
}

fn estimate_affine_fundamental(pairs: &[Correspondence]) -> Option<AffineFundamental> {
    if pairs.len() < AffineFundamentalFit::MIN_SAMPLES {
        return None;
    }

    // Joint vectors (xr, yr, xl, yl); the plane normal through their mean
    // is the smallest right singular vector of the centered data.
    let n = pairs.len() as f64;
    let mut mean = [0.0f64; 4];
    for p in pairs {
        mean[0] += p.right.x;
        mean[1] += p.right.y;
        mean[2] += p.left.x;
        mean[3] += p.left.y;
    }
    for m in &mut mean {
        *m /= n;
    }

    let rows = pairs.len().max(4);
    let mut a = DMatrix::<f64>::zeros(rows, 4);
    for (i, p) in pairs.iter().enumerate() {
        a[(i, 0)] = p.right.x - mean[0];
        a[(i, 1)] = p.right.y - mean[1];
        a[(i, 2)] = p.left.x - mean[2];
        a[(i, 3)] = p.left.y - mean[3];
    }

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    let normal = v_t.row(min_idx);
    let (ca, cb, cc, cd) = (normal[0], normal[1], normal[2], normal[3]);
    let e = -(ca * mean[0] + cb * mean[1] + cc * mean[2] + cd * mean[3]);

    let matrix = DMat3::from_rows([0.0, 0.0, ca], [0.0, 0.0, cb], [cc, cd, e]);
    matrix.is_finite().then_some(AffineFundamental { matrix })
}

fn estimate_affine(pairs: &[Correspondence]) -> Option<Transform> {
    if pairs.len() < AffineFit::MIN_SAMPLES {
        return None;
    }

    // Normal equations for right = A * left + t, solved once per output axis:
    // [sxx sxy sx] [a]   [sx_r]
    // [sxy syy sy] [b] = [sy_r]
    // [sx  sy  n ] [t]   [s_r ]
    let n = pairs.len() as f64;
    let (mut sx, mut sy, mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let mut rhs_x = DVec2::ZERO;
    let mut rhs_y = DVec2::ZERO;
    let mut sum_r = DVec2::ZERO;
    for p in pairs {
        let (l, r) = (p.left, p.right);
        sx += l.x;
        sy += l.y;
        sxx += l.x * l.x;
        sxy += l.x * l.y;
        syy += l.y * l.y;
        rhs_x += l.x * r;
        rhs_y += l.y * r;
        sum_r += r;
    }

    let normal = DMat3::from_rows([sxx, sxy, sx], [sxy, syy, sy], [sx, sy, n]);
    let inv = normal.inverse()?;
    let solve = |bx: f64, by: f64, b1: f64| {
        let m = inv.as_array();
        [
            m[0] * bx + m[1] * by + m[2] * b1,
            m[3] * bx + m[4] * by + m[5] * b1,
            m[6] * bx + m[7] * by + m[8] * b1,
        ]
    };
    let [a, b, tx] = solve(rhs_x.x, rhs_y.x, sum_r.x);
    let [c, d, ty] = solve(rhs_x.y, rhs_y.y, sum_r.y);

    let transform = Transform::affine([a, b, tx, c, d, ty]);
    transform.is_valid().then_some(transform)
}

fn estimate_homography(pairs: &[Correspondence]) -> Option<Transform> {
    if pairs.len() < HomographyFit::MIN_SAMPLES {
        return None;
    }

    let left: Vec<DVec2> = pairs.iter().map(|p| p.left).collect();
    let right: Vec<DVec2> = pairs.iter().map(|p| p.right).collect();
    let (left_norm, left_t) = normalize_points(&left);
    let (right_norm, right_t) = normalize_points(&right);

    // Two rows per pair of the 2n x 9 DLT system A h = 0.
    let n = pairs.len();
    let mut a_data = vec![0.0f64; 2 * n * 9];
    for (i, (l, r)) in left_norm.iter().zip(&right_norm).enumerate() {
        let base = i * 18;
        a_data[base..base + 9].copy_from_slice(&[
            -l.x,
            -l.y,
            -1.0,
            0.0,
            0.0,
            0.0,
            l.x * r.x,
            l.y * r.x,
            r.x,
        ]);
        a_data[base + 9..base + 18].copy_from_slice(&[
            0.0,
            0.0,
            0.0,
            -l.x,
            -l.y,
            -1.0,
            l.x * r.y,
            l.y * r.y,
            r.y,
        ]);
    }
    let h_norm = solve_homogeneous_svd(DMatrix::from_row_slice(2 * n, 9, &a_data))?;

    // H = T_right^-1 * H_norm * T_left
    let h = right_t.inverse()?.mul_mat(&h_norm).mul_mat(&left_t);
    let transform = Transform::homography(h.normalized()?);
    transform.is_valid().then_some(transform)
}

/// Moves the centroid to the origin and scales the mean distance to sqrt(2).
fn normalize_points(points: &[DVec2]) -> (Vec<DVec2>, DMat3) {
    let c = points.iter().copied().sum::<DVec2>() / points.len().max(1) as f64;
    let mean_dist = points.iter().map(|p| (*p - c).length()).sum::<f64>() / points.len().max(1) as f64;
    if mean_dist < 1e-10 {
        return (points.to_vec(), DMat3::identity());
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = points.iter().map(|p| (*p - c) * s).collect();
    let t = DMat3::from_rows([s, 0.0, -c.x * s], [0.0, s, -c.y * s], [0.0, 0.0, 1.0]);
    (normalized, t)
}

/// Null vector of `a` (m x 9) via SVD; rows are zero-padded to 9 so the
/// thin SVD still exposes the full right-singular basis.
fn solve_homogeneous_svd(a: DMatrix<f64>) -> Option<DMat3> {
    let (nrows, ncols) = a.shape();
    let a = if nrows < ncols {
        let mut padded = DMatrix::zeros(ncols, ncols);
        padded.view_mut((0, 0), (nrows, ncols)).copy_from(&a);
        padded
    } else {
        a
    };

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;

    let mut data = [0.0f64; 9];
    for (dst, &src) in data.iter_mut().zip(v_t.row(min_idx).iter()) {
        *dst = src;
    }
    Some(DMat3::from_array(data))
}
