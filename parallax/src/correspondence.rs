//! Matched point pairs between the left and right image.

use glam::DVec2;

use crate::transform::Transform;

/// A left/right point pair. Coordinates are tile-local unless a caller
/// shifts them into the absolute frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Correspondence {
    pub left: DVec2,
    pub right: DVec2,
}

impl Correspondence {
    #[inline]
    pub const fn new(left: DVec2, right: DVec2) -> Self {
        Self { left, right }
    }

    /// `right - left`.
    #[inline]
    pub fn offset(&self) -> DVec2 {
        self.right - self.left
    }

    #[inline]
    pub fn swapped(&self) -> Self {
        Self::new(self.right, self.left)
    }

    pub fn transformed(&self, left: &Transform, right: &Transform) -> Self {
        Self::new(left.apply(self.left), right.apply(self.right))
    }
}

/// Mean `|y_left - y_right|`, or `None` for an empty set.
pub fn average_delta_y(pairs: &[Correspondence]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs.iter().map(|c| (c.left.y - c.right.y).abs()).sum();
    Some(total / pairs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_delta_y() {
        let pairs = [
            Correspondence::new(DVec2::new(0.0, 1.0), DVec2::new(5.0, 3.0)),
            Correspondence::new(DVec2::new(2.0, 4.0), DVec2::new(9.0, 4.0)),
            Correspondence::new(DVec2::new(1.0, 0.0), DVec2::new(1.0, -4.0)),
        ];
        assert_eq!(average_delta_y(&pairs), Some(2.0));
        assert_eq!(average_delta_y(&[]), None);
    }
}
