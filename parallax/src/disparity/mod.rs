//! Dense disparity fields and their persistence.

pub mod io;
pub mod outliers;


use common::Buffer2;
use glam::Vec2;

use crate::math::{PixelBox, SearchRange};

pub use io::{DisparityNumeric, read_disparity, write_disparity};
pub use outliers::{OutlierRejection, reject_outliers};

/// Offset from a left pixel to its right-image match.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisparityPixel {
    pub offset: Vec2,
    pub valid: bool,
}

impl DisparityPixel {
    pub const INVALID: DisparityPixel = DisparityPixel {
        offset: Vec2::ZERO,
        valid: false,
    };

    #[inline]
    pub const fn new(offset: Vec2) -> Self {
        Self {
            offset,
            valid: true,
        }
    }

    #[inline]
    pub fn valid_offset(&self) -> Option<Vec2> {
        self.valid.then_some(self.offset)
    }
}

/// Grid of disparity pixels. Offsets are meaningful only where `valid`.
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityField {
    pixels: Buffer2<DisparityPixel>,
}

impl DisparityField {
    pub fn new_invalid(width: usize, height: usize) -> Self {
        Self {
            pixels: Buffer2::new_filled(width, height, DisparityPixel::INVALID),
        }
    }

    pub fn from_buffer(pixels: Buffer2<DisparityPixel>) -> Self {
        Self { pixels }
    }

    pub fn from_fn(
        width: usize,
        height: usize,
        f: impl FnMut(usize, usize) -> DisparityPixel,
    ) -> Self {
        Self {
            pixels: Buffer2::from_fn(width, height, f),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    #[inline]
    pub fn size(&self) -> (usize, usize) {
        self.pixels.size()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> DisparityPixel {
        self.pixels[(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, pixel: DisparityPixel) {
        self.pixels[(x, y)] = pixel;
    }

    pub fn pixels(&self) -> &Buffer2<DisparityPixel> {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut Buffer2<DisparityPixel> {
        &mut self.pixels
    }

    pub fn valid_count(&self) -> usize {
        self.pixels.iter().filter(|p| p.valid).count()
    }

    /// Valid pixels as `(x, y, offset)`.
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, usize, Vec2)> + '_ {
        let width = self.width();
        self.pixels
            .iter()
            .enumerate()
            .filter_map(move |(i, p)| p.valid_offset().map(|o| (i % width, i / width, o)))
    }

    /// Bounding range of the valid offsets; empty when nothing is valid.
    pub fn range(&self) -> SearchRange {
        SearchRange::enclosing(self.pixels.iter().filter_map(DisparityPixel::valid_offset))
    }

    /// Component-wise largest valid offset magnitude, or `None` when nothing
    /// is valid.
    pub fn max_abs_offset(&self) -> Option<Vec2> {
        self.pixels
            .iter()
            .filter_map(DisparityPixel::valid_offset)
            .map(Vec2::abs)
            .reduce(Vec2::max)
    }

    /// Copies `bbox`; parts outside the field come back invalid.
    pub fn crop(&self, bbox: &PixelBox) -> DisparityField {
        let (w, h) = bbox.size();
        Self {
            pixels: self.pixels.crop(
                bbox.min.x as i64,
                bbox.min.y as i64,
                w,
                h,
                DisparityPixel::INVALID,
            ),
        }
    }

    /// Writes `tile` with its top-left corner at `origin`.
    pub fn paste(&mut self, tile: &DisparityField, origin: glam::IVec2) {
        self.pixels
            .paste(&tile.pixels, origin.x as i64, origin.y as i64);
    }

    /// Rounds every offset to the nearest integer.
    pub fn rounded(&self) -> DisparityField {
        Self {
            pixels: self.pixels.map(|p| DisparityPixel {
                offset: p.offset.round(),
                valid: p.valid,
            }),
        }
    }
}
