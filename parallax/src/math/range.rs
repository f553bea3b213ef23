//! Axis-aligned boxes over disparity offsets.

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Inclusive box `[min, max]` of candidate disparity offsets.
///
/// A range with `min > max` on either axis is empty and places no
/// constraint; [`SearchRange::EMPTY`] is the canonical empty value and the
/// identity for [`SearchRange::grow`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchRange {
    pub min: Vec2,
    pub max: Vec2,
}

impl SearchRange {
    pub const EMPTY: SearchRange = SearchRange {
        min: Vec2::INFINITY,
        max: Vec2::NEG_INFINITY,
    };

    #[inline]
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn from_bounds(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min: Vec2::new(min_x, min_y),
            max: Vec2::new(max_x, max_y),
        }
    }

    /// Smallest range holding every offset; empty for no offsets.
    pub fn enclosing(offsets: impl IntoIterator<Item = Vec2>) -> Self {
        offsets.into_iter().fold(Self::EMPTY, |r, p| r.grow(p))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !(self.min.x <= self.max.x && self.min.y <= self.max.y)
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Extends the range to include `p`.
    #[inline]
    pub fn grow(&self, p: Vec2) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn union(&self, other: &SearchRange) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Widens each side by `by`.
    #[inline]
    pub fn expand(&self, by: Vec2) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            min: self.min - by,
            max: self.max + by,
        }
    }

    /// Multiplies both bounds by `factor` per axis.
    #[inline]
    pub fn scale(&self, factor: Vec2) -> Self {
        if self.is_empty() {
            return *self;
        }
        let a = self.min * factor;
        let b = self.max * factor;
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Rounds to the enclosing integer range (floor min, ceil max).
    #[inline]
    pub fn round_outward(&self) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            min: self.min.floor(),
            max: self.max.ceil(),
        }
    }

    /// Scales by `factor` and rounds outward, so every scaled offset stays
    /// inside the result.
    #[inline]
    pub fn scale_outward(&self, factor: Vec2) -> Self {
        self.scale(factor).round_outward()
    }

    #[inline]
    pub fn translate(&self, by: Vec2) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self {
            min: self.min + by,
            max: self.max + by,
        }
    }

    /// Intersection with `limit`. An empty limit means "no limit".
    pub fn clip(&self, limit: &SearchRange) -> Self {
        if limit.is_empty() || self.is_empty() {
            return *self;
        }
        Self {
            min: self.min.max(limit.min),
            max: self.max.min(limit.max),
        }
    }

    /// Scales the extent by `factor` about the center.
    pub fn inflate(&self, factor: f32) -> Self {
        if self.is_empty() {
            return *self;
        }
        let c = self.center();
        let half = self.size() * 0.5 * factor;
        Self {
            min: c - half,
            max: c + half,
        }
    }

    #[inline]
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x <= self.max.x && p.y <= self.max.y
    }

    /// `true` when `other` lies inside `self`. Empty ranges are contained in
    /// anything.
    pub fn contains(&self, other: &SearchRange) -> bool {
        other.is_empty() || (self.contains_point(other.min) && self.contains_point(other.max))
    }
}

impl Default for SearchRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for SearchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "[empty]");
        }
        write!(
            f,
            "[({}, {}) .. ({}, {})]",
            self.min.x, self.min.y, self.max.x, self.max.y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_grow_identity() {
        let r = SearchRange::EMPTY.grow(Vec2::new(3.0, -1.0));
        assert_eq!(r, SearchRange::from_bounds(3.0, -1.0, 3.0, -1.0));
        assert!(!r.is_empty());
        assert!(SearchRange::enclosing(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_scale_outward() {
        let r = SearchRange::from_bounds(-1.2, 0.0, 3.4, 0.5);
        let s = r.scale_outward(Vec2::splat(2.0));
        assert_eq!(s, SearchRange::from_bounds(-3.0, 0.0, 7.0, 1.0));
    }

    #[test]
    fn test_scale_by_negative_keeps_order() {
        let r = SearchRange::from_bounds(1.0, 2.0, 3.0, 4.0);
        let s = r.scale(Vec2::new(-1.0, 1.0));
        assert_eq!(s, SearchRange::from_bounds(-3.0, 2.0, -1.0, 4.0));
    }

    #[test]
    fn test_clip_to_limit() {
        let r = SearchRange::from_bounds(-50.0, -5.0, 80.0, 5.0);
        let limit = SearchRange::from_bounds(-20.0, -2.0, 20.0, 2.0);
        assert_eq!(r.clip(&limit), limit);
        assert_eq!(r.clip(&SearchRange::EMPTY), r);
    }

    #[test]
    fn test_inflate_about_center() {
        let r = SearchRange::from_bounds(0.0, -1.0, 4.0, 1.0);
        assert_eq!(r.inflate(2.0), SearchRange::from_bounds(-2.0, -2.0, 6.0, 2.0));
    }

    #[test]
    fn test_contains() {
        let outer = SearchRange::from_bounds(-5.0, -5.0, 5.0, 5.0);
        assert!(outer.contains(&SearchRange::from_bounds(-1.0, 0.0, 5.0, 1.0)));
        assert!(!outer.contains(&SearchRange::from_bounds(-6.0, 0.0, 0.0, 1.0)));
        assert!(outer.contains(&SearchRange::EMPTY));
    }
}
