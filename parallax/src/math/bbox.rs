//! Integer pixel rectangles and the tile grid built from them.

use std::fmt;

use glam::{DVec2, IVec2};
use serde::{Deserialize, Serialize};

/// Half-open pixel rectangle `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelBox {
    pub min: IVec2,
    pub max: IVec2,
}

impl PixelBox {
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            min: IVec2::new(x, y),
            max: IVec2::new(x + width, y + height),
        }
    }

    #[inline]
    pub const fn from_corners(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    /// Box covering a `width x height` image.
    #[inline]
    pub fn from_size(width: usize, height: usize) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Smallest box holding every point, rounded outward.
    pub fn enclosing(points: impl IntoIterator<Item = DVec2>) -> Self {
        let mut lo = DVec2::splat(f64::INFINITY);
        let mut hi = DVec2::splat(f64::NEG_INFINITY);
        for p in points {
            lo = lo.min(p);
            hi = hi.max(p);
        }
        if !(lo.x <= hi.x && lo.y <= hi.y) {
            return Self::default();
        }
        Self {
            min: lo.floor().as_ivec2(),
            max: hi.ceil().as_ivec2(),
        }
    }

    #[inline]
    pub fn width(&self) -> i32 {
        (self.max.x - self.min.x).max(0)
    }

    #[inline]
    pub fn height(&self) -> i32 {
        (self.max.y - self.min.y).max(0)
    }

    /// `(width, height)` as unsigned sizes.
    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width() as usize, self.height() as usize)
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    #[inline]
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }

    #[inline]
    pub fn contains_box(&self, other: &PixelBox) -> bool {
        other.is_empty()
            || (other.min.x >= self.min.x
                && other.min.y >= self.min.y
                && other.max.x <= self.max.x
                && other.max.y <= self.max.y)
    }

    #[inline]
    pub fn expand(&self, by: i32) -> Self {
        self.expand_xy(IVec2::splat(by))
    }

    #[inline]
    pub fn expand_xy(&self, by: IVec2) -> Self {
        Self {
            min: self.min - by,
            max: self.max + by,
        }
    }

    #[inline]
    pub fn translate(&self, offset: IVec2) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Intersection; empty boxes collapse to a zero-size box at `self.min`.
    pub fn intersect(&self, other: &PixelBox) -> Self {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if max.x <= min.x || max.y <= min.y {
            return Self { min, max: min };
        }
        Self { min, max }
    }

    pub fn union(&self, other: &PixelBox) -> Self {
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

    /// Maps the box into a grid scaled by `factor` per axis: min is floored,
    /// max is ceiled, so the result always covers the scaled area.
    pub fn scale_outward(&self, factor: DVec2) -> Self {
        let min = (self.min.as_dvec2() * factor).floor().as_ivec2();
        let max = (self.max.as_dvec2() * factor).ceil().as_ivec2();
        Self { min, max }
    }

    /// Corner points in pixel coordinates, as used for transforming extents.
    pub fn corners(&self) -> [DVec2; 4] {
        let lo = self.min.as_dvec2();
        let hi = self.max.as_dvec2();
        [
            lo,
            DVec2::new(hi.x, lo.y),
            DVec2::new(lo.x, hi.y),
            hi,
        ]
    }
}

impl fmt::Display for PixelBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.min.x,
            self.min.y,
            self.width(),
            self.height()
        )
    }
}

/// One cell of the output tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub row: usize,
    pub col: usize,
    pub bbox: PixelBox,
}

impl Tile {
    /// Short identifier used for logs and diagnostic file names.
    pub fn label(&self) -> String {
        format!("tile_{}_{}", self.row, self.col)
    }
}

/// Number of tile `(rows, cols)` needed to cover a `width x height` image.
pub fn grid_dims(width: usize, height: usize, tile_size: usize) -> (usize, usize) {
    assert!(tile_size > 0, "tile_size must be > 0");
    (height.div_ceil(tile_size), width.div_ceil(tile_size))
}

/// Row-major tiles covering the image; edge tiles are clipped to it.
pub fn tile_grid(width: usize, height: usize, tile_size: usize) -> Vec<Tile> {
    let (rows, cols) = grid_dims(width, height, tile_size);
    let image = PixelBox::from_size(width, height);
    let step = tile_size as i32;
    let mut tiles = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let bbox = PixelBox::new(col as i32 * step, row as i32 * step, step, step);
            tiles.push(Tile {
                row,
                col,
                bbox: bbox.intersect(&image),
            });
        }
    }
    tiles
}
