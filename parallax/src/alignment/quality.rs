use std::fmt;

use crate::correspondence::Correspondence;
use crate::transform::Transform;

/// Bounds on `|det|` of a transform's linear part, both exclusive.
pub const DETERMINANT_RANGE: (f64, f64) = (0.1, 10.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// The transform shrinks or stretches the tile implausibly.
    Determinant { side: Side, determinant: f64 },
    /// Vertical mismatch did not drop below the pre-fit value. `after` is
    /// NaN when no pair survived the transforms.
    NoImprovement { before: f64, after: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Determinant { side, determinant } => {
                write!(f, "{side:?} determinant {determinant:.4} out of range")
            }
            Rejection::NoImprovement { before, after } => {
                write!(f, "mean |dy| {after:.3} not below {before:.3}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityVerdict {
    Accepted { mean_delta_y: f64 },
    Rejected(Rejection),
}

impl QualityVerdict {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityVerdict::Accepted { .. })
    }
}

/// Judges a left/right transform pair against the correspondences it was
/// fit to, all in crop-local coordinates.
///
/// The determinant gate runs first, so a degenerate pair is rejected no
/// matter how well it flattens the residuals.
pub fn evaluate(
    left: &Transform,
    right: &Transform,
    pairs: &[Correspondence],
    before: f64,
) -> QualityVerdict {
    for (side, t) in [(Side::Left, left), (Side::Right, right)] {
        let determinant = t.linear_determinant().abs();
        if !(determinant > DETERMINANT_RANGE.0 && determinant < DETERMINANT_RANGE.1) {
            return QualityVerdict::Rejected(Rejection::Determinant { side, determinant });
        }
    }

    let deltas: Vec<f64> = pairs
        .iter()
        .map(|p| p.transformed(left, right))
        .filter(|p| p.left.is_finite() && p.right.is_finite())
        .map(|p| (p.left.y - p.right.y).abs())
        .collect();
    let after = if deltas.is_empty() {
        f64::NAN
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    };

    if after < before {
        QualityVerdict::Accepted {
            mean_delta_y: after,
        }
    } else {
        QualityVerdict::Rejected(Rejection::NoImprovement { before, after })
    }
}
