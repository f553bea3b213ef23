//! Raster access. Pixels are pulled per tile through [`RasterSource`] so
//! images larger than memory never have to be loaded whole.

use common::Buffer2;

use crate::error::Result;
use crate::math::PixelBox;

/// Tiled read access to a single-band image.
pub trait RasterSource: Send + Sync {
    /// `(cols, rows)`.
    fn size(&self) -> (usize, usize);

    /// Reads `bbox`; pixels outside the image are `NaN`.
    fn read_tile(&self, bbox: PixelBox) -> Result<Buffer2<f32>>;

    fn nodata(&self) -> Option<f32> {
        None
    }

    fn bounds(&self) -> PixelBox {
        let (w, h) = self.size();
        PixelBox::from_size(w, h)
    }
}

/// Pixels plus a validity mask of the same size.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedImage {
    pub pixels: Buffer2<f32>,
    pub valid: Buffer2<bool>,
}

impl MaskedImage {
    /// Marks non-finite and nodata pixels invalid.
    pub fn from_pixels(pixels: Buffer2<f32>, nodata: Option<f32>) -> Self {
        let valid = pixels.map(|&v| v.is_finite() && Some(v) != nodata);
        Self { pixels, valid }
    }

    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    pub fn size(&self) -> (usize, usize) {
        self.pixels.size()
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.valid[(x, y)]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Box-filter downsampling by an integer `factor`. An output pixel is
    /// valid only when its whole footprint is.
    pub fn downsample(&self, factor: usize) -> MaskedImage {
        assert!(factor > 0, "downsample factor must be > 0");
        let w = self.width() / factor;
        let h = self.height() / factor;
        let area = (factor * factor) as f32;
        let mut pixels = Buffer2::new_filled(w, h, f32::NAN);
        let mut valid = Buffer2::new_filled(w, h, false);
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0.0;
                let mut ok = true;
                for dy in 0..factor {
                    for dx in 0..factor {
                        let (sx, sy) = (x * factor + dx, y * factor + dy);
                        ok &= self.valid[(sx, sy)];
                        sum += self.pixels[(sx, sy)];
                    }
                }
                if ok {
                    pixels[(x, y)] = sum / area;
                    valid[(x, y)] = true;
                }
            }
        }
        MaskedImage { pixels, valid }
    }
}

/// Reads `bbox` from `source` and derives its validity mask.
pub fn read_masked(source: &dyn RasterSource, bbox: PixelBox) -> Result<MaskedImage> {
    let pixels = source.read_tile(bbox)?;
    Ok(MaskedImage::from_pixels(pixels, source.nodata()))
}

/// Whole image kept in memory.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    image: Buffer2<f32>,
    nodata: Option<f32>,
}

impl MemoryRaster {
    pub fn new(image: Buffer2<f32>) -> Self {
        Self {
            image,
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Box-filtered copy, invalid footprints become `NaN`.
    pub fn downsampled(&self, factor: usize) -> MemoryRaster {
        let masked = MaskedImage::from_pixels(self.image.clone(), self.nodata);
        MemoryRaster::new(masked.downsample(factor).pixels)
    }

    pub fn image(&self) -> &Buffer2<f32> {
        &self.image
    }
}

impl RasterSource for MemoryRaster {
    fn size(&self) -> (usize, usize) {
        self.image.size()
    }

    fn read_tile(&self, bbox: PixelBox) -> Result<Buffer2<f32>> {
        let (w, h) = bbox.size();
        Ok(self
            .image
            .crop(bbox.min.x as i64, bbox.min.y as i64, w, h, f32::NAN))
    }

    fn nodata(&self) -> Option<f32> {
        self.nodata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_masked_outside_is_invalid() {
        let raster = MemoryRaster::new(Buffer2::from_fn(4, 4, |x, y| (x + y) as f32));
        let tile = read_masked(&raster, PixelBox::new(2, 2, 4, 4)).unwrap();
        assert_eq!(tile.size(), (4, 4));
        assert!(tile.is_valid(1, 1));
        assert_eq!(tile.pixels[(1, 1)], 6.0);
        assert!(!tile.is_valid(2, 0));
        assert_eq!(tile.valid_count(), 4);
    }

    #[test]
    fn test_nodata_is_invalid() {
        let raster = MemoryRaster::new(Buffer2::new(2, 1, vec![-9999.0, 1.0])).with_nodata(-9999.0);
        let tile = read_masked(&raster, raster.bounds()).unwrap();
        assert_eq!(tile.valid.pixels(), &[false, true]);
    }

    #[test]
    fn test_downsample_box_average() {
        let image = MaskedImage::from_pixels(Buffer2::from_fn(4, 2, |x, _| x as f32), None);
        let half = image.downsample(2);
        assert_eq!(half.size(), (2, 1));
        assert_eq!(half.pixels.pixels(), &[0.5, 2.5]);
    }

    #[test]
    fn test_downsample_propagates_invalid() {
        let mut pixels = Buffer2::new_filled(4, 4, 1.0f32);
        pixels[(3, 3)] = f32::NAN;
        let half = MaskedImage::from_pixels(pixels, None).downsample(2);
        assert_eq!(half.valid.pixels(), &[true, true, true, false]);
    }
}
