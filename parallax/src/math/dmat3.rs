//! Row-major 3x3 matrix of f64 values.

use glam::DVec2;
use std::ops::{Index, IndexMut, Mul};

/// Row-major 3x3 matrix used for 2-D homogeneous transforms.
///
/// ```text
/// | m[0] m[1] m[2] |     | a  b  tx |
/// | m[3] m[4] m[5] |  =  | c  d  ty |
/// | m[6] m[7] m[8] |     | g  h  1  |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DMat3 {
    data: [f64; 9],
}

impl DMat3 {
    #[inline]
    pub const fn from_array(data: [f64; 9]) -> Self {
        Self { data }
    }

    #[inline]
    pub const fn identity() -> Self {
        Self {
            data: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    #[inline]
    pub const fn from_rows(row0: [f64; 3], row1: [f64; 3], row2: [f64; 3]) -> Self {
        Self {
            data: [
                row0[0], row0[1], row0[2], row1[0], row1[1], row1[2], row2[0], row2[1], row2[2],
            ],
        }
    }

    #[inline]
    pub const fn translation(t: DVec2) -> Self {
        Self::from_rows([1.0, 0.0, t.x], [0.0, 1.0, t.y], [0.0, 0.0, 1.0])
    }

    #[inline]
    pub const fn as_array(&self) -> &[f64; 9] {
        &self.data
    }

    #[inline]
    pub const fn to_array(self) -> [f64; 9] {
        self.data
    }

    /// `self * rhs`: applies `rhs` first, then `self`.
    #[inline]
    pub fn mul_mat(&self, rhs: &DMat3) -> DMat3 {
        let a = &self.data;
        let b = &rhs.data;
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] =
                    a[r * 3] * b[c] + a[r * 3 + 1] * b[3 + c] + a[r * 3 + 2] * b[6 + c];
            }
        }
        DMat3 { data: out }
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        let d = &self.data;
        d[0] * (d[4] * d[8] - d[5] * d[7]) - d[1] * (d[3] * d[8] - d[5] * d[6])
            + d[2] * (d[3] * d[7] - d[4] * d[6])
    }

    /// Determinant of the upper-left 2x2 block, i.e. the area scale of the
    /// linear part.
    #[inline]
    pub fn linear_determinant(&self) -> f64 {
        self.data[0] * self.data[4] - self.data[1] * self.data[3]
    }

    /// Inverse, or `None` when singular (|det| < 1e-12).
    pub fn inverse(&self) -> Option<DMat3> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let d = &self.data;
        Some(DMat3 {
            data: [
                (d[4] * d[8] - d[5] * d[7]) * inv_det,
                (d[2] * d[7] - d[1] * d[8]) * inv_det,
                (d[1] * d[5] - d[2] * d[4]) * inv_det,
                (d[5] * d[6] - d[3] * d[8]) * inv_det,
                (d[0] * d[8] - d[2] * d[6]) * inv_det,
                (d[2] * d[3] - d[0] * d[5]) * inv_det,
                (d[3] * d[7] - d[4] * d[6]) * inv_det,
                (d[1] * d[6] - d[0] * d[7]) * inv_det,
                (d[0] * d[4] - d[1] * d[3]) * inv_det,
            ],
        })
    }

    /// Homogeneous point transform. Points mapped to infinity come back
    /// non-finite.
    #[inline]
    pub fn transform_point(&self, p: DVec2) -> DVec2 {
        let d = &self.data;
        let w = d[6] * p.x + d[7] * p.y + d[8];
        DVec2::new(
            (d[0] * p.x + d[1] * p.y + d[2]) / w,
            (d[3] * p.x + d[4] * p.y + d[5]) / w,
        )
    }

    /// Divides every entry by `m[8]` so the matrix reads as a normalized
    /// homography. `None` when `m[8]` is ~0.
    pub fn normalized(&self) -> Option<DMat3> {
        let scale = self.data[8];
        if scale.abs() < 1e-12 {
            return None;
        }
        Some(*self * (1.0 / scale))
    }

    /// Frobenius norm of the difference from the identity matrix.
    pub fn deviation_from_identity(&self) -> f64 {
        self.data
            .iter()
            .zip(Self::identity().data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

impl Default for DMat3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[f64; 9]> for DMat3 {
    fn from(data: [f64; 9]) -> Self {
        Self::from_array(data)
    }
}

impl Index<usize> for DMat3 {
    type Output = f64;
    #[inline]
    fn index(&self, idx: usize) -> &f64 {
        &self.data[idx]
    }
}

impl IndexMut<usize> for DMat3 {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut f64 {
        &mut self.data[idx]
    }
}

impl Mul for DMat3 {
    type Output = DMat3;
    #[inline]
    fn mul(self, rhs: DMat3) -> DMat3 {
        self.mul_mat(&rhs)
    }
}

impl Mul<DVec2> for DMat3 {
    type Output = DVec2;
    #[inline]
    fn mul(self, rhs: DVec2) -> DVec2 {
        self.transform_point(rhs)
    }
}

impl Mul<f64> for DMat3 {
    type Output = DMat3;
    #[inline]
    fn mul(self, rhs: f64) -> DMat3 {
        let mut out = self;
        for v in out.data.iter_mut() {
            *v *= rhs;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-10;

    fn mat_approx_eq(a: &DMat3, b: &DMat3) -> bool {
        a.as_array()
            .iter()
            .zip(b.as_array().iter())
            .all(|(x, y)| (x - y).abs() < EPS)
    }

    #[test]
    fn test_default_is_identity() {
        assert_eq!(DMat3::default(), DMat3::identity());
        assert_eq!(DMat3::identity().deviation_from_identity(), 0.0);
    }

    #[test]
    fn test_mul_applies_rhs_first() {
        let scale = DMat3::from_rows([2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]);
        let shift = DMat3::translation(DVec2::new(5.0, -1.0));
        let p = DVec2::new(1.0, 1.0);
        // Scale then shift.
        assert_eq!((shift * scale) * p, DVec2::new(7.0, 1.0));
        // Shift then scale.
        assert_eq!((scale * shift) * p, DVec2::new(12.0, 0.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = DMat3::from_rows([1.2, 0.1, 4.0], [-0.05, 0.9, -3.0], [1e-4, 2e-4, 1.0]);
        let inv = m.inverse().unwrap();
        assert!(mat_approx_eq(&m.mul_mat(&inv), &DMat3::identity()));
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let m = DMat3::from_rows([1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]);
        assert!(m.inverse().is_none());
    }

    #[test]
    fn test_linear_determinant_ignores_translation() {
        let m = DMat3::from_rows([3.0, 1.0, 100.0], [0.0, 0.5, -40.0], [0.0, 0.0, 1.0]);
        assert!((m.linear_determinant() - 1.5).abs() < EPS);
    }

    #[test]
    fn test_projective_point() {
        let m = DMat3::from_rows([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.0, 1.0]);
        let p = m.transform_point(DVec2::new(2.0, 4.0));
        assert!((p.x - 1.0).abs() < EPS);
        assert!((p.y - 2.0).abs() < EPS);
    }

    #[test]
    fn test_normalized() {
        let m = DMat3::identity() * 4.0;
        assert!(mat_approx_eq(&m.normalized().unwrap(), &DMat3::identity()));
        let mut degenerate = DMat3::identity();
        degenerate[8] = 0.0;
        assert!(degenerate.normalized().is_none());
    }
}
