//! Planar projective transforms tagged with their degrees of freedom.

use glam::DVec2;

use crate::math::DMat3;

/// Family a [`Transform`] belongs to. Identity is the safe default for every
/// fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformKind {
    #[default]
    Identity,
    Translation,
    Affine,
    Homography,
}

/// A 3x3 homogeneous transform of the image plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub matrix: DMat3,
    pub kind: TransformKind,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            matrix: DMat3::identity(),
            kind: TransformKind::Identity,
        }
    }

    #[inline]
    pub const fn from_matrix(matrix: DMat3, kind: TransformKind) -> Self {
        Self { matrix, kind }
    }

    pub fn translation(t: DVec2) -> Self {
        Self::from_matrix(DMat3::translation(t), TransformKind::Translation)
    }

    /// Affine transform from `[a, b, tx, c, d, ty]`.
    pub fn affine(params: [f64; 6]) -> Self {
        Self::from_matrix(
            DMat3::from_array([
                params[0], params[1], params[2], params[3], params[4], params[5], 0.0, 0.0, 1.0,
            ]),
            TransformKind::Affine,
        )
    }

    pub fn homography(matrix: DMat3) -> Self {
        Self::from_matrix(matrix, TransformKind::Homography)
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        self.matrix.transform_point(p)
    }

    pub fn inverse(&self) -> Option<Transform> {
        Some(Self::from_matrix(self.matrix.inverse()?, self.kind))
    }

    /// `self ∘ first`: applies `first`, then `self`.
    pub fn compose(&self, first: &Transform) -> Transform {
        let kind = match (self.kind, first.kind) {
            (TransformKind::Identity, k) | (k, TransformKind::Identity) => k,
            (TransformKind::Translation, TransformKind::Translation) => TransformKind::Translation,
            (TransformKind::Homography, _) | (_, TransformKind::Homography) => {
                TransformKind::Homography
            }
            _ => TransformKind::Affine,
        };
        Self::from_matrix(self.matrix.mul_mat(&first.matrix), kind)
    }

    /// Follows this transform with a translation by `t`.
    pub fn then_translate(&self, t: DVec2) -> Transform {
        Transform::translation(t).compose(self)
    }

    /// Area scale of the linear 2x2 part.
    #[inline]
    pub fn linear_determinant(&self) -> f64 {
        self.matrix.linear_determinant()
    }

    pub fn is_identity(&self) -> bool {
        self.kind == TransformKind::Identity || self.matrix.deviation_from_identity() < 1e-12
    }

    pub fn is_valid(&self) -> bool {
        self.matrix.is_finite() && self.matrix.determinant().abs() > 1e-12
    }
}
