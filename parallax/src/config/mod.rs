//! Options of the correlation pipeline.
//!
//! Every section has a `Default` matching the usual command-line defaults
//! of the stereo tools, so a YAML or JSON file only needs the keys it
//! changes.

#[cfg(test)]
mod tests;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::disparity::{DisparityNumeric, OutlierRejection};
use crate::error::{Error, Result};
use crate::features::FinderConfig;
use crate::math::{PixelBox, SearchRange};

// =============================================================================
// Modes
// =============================================================================

/// Where the low-resolution seed disparity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// No seed; every tile searches the global range.
    Disabled,
    /// Correlate the subsampled images.
    #[default]
    Correlation,
    /// Predict disparity from a terrain model.
    Terrain,
    /// Use a seed computed elsewhere.
    External,
}

/// Per-tile realignment applied before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    #[default]
    None,
    Homography,
    AffineEpipolar,
}

impl AlignmentMode {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        *self != AlignmentMode::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostFunction {
    AbsoluteDifference,
    SquaredDifference,
    #[default]
    NormalizedCrossCorrelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationAlgorithm {
    /// Local window correlation.
    #[default]
    Window,
    /// Semi-global aggregation.
    SemiGlobal,
    /// More-global aggregation.
    MoreGlobal,
}

impl CorrelationAlgorithm {
    /// Aggregating matchers see the whole image at once.
    #[inline]
    pub fn is_window(&self) -> bool {
        *self == CorrelationAlgorithm::Window
    }

    /// Window correlation yields integer offsets, the aggregating
    /// algorithms sub-pixel ones.
    pub fn output_numeric(&self) -> DisparityNumeric {
        if self.is_window() {
            DisparityNumeric::Integer
        } else {
            DisparityNumeric::Float
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Outlier filtering of the low-resolution seed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Offsets closer than this count as agreeing neighbours.
    pub threshold: f32,
    /// Percentage of agreeing neighbours a pixel needs.
    pub min_matches_percent: f32,
    pub quantile_percentile: f32,
    /// Quantile filtering replaces the neighbour rule when positive.
    pub quantile_multiple: f32,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            min_matches_percent: 60.0,
            quantile_percentile: 0.85,
            quantile_multiple: -1.0,
        }
    }
}

impl OutlierConfig {
    /// Rule applied to the seed disparity. The neighbour rule runs on a 3x3
    /// window with a tighter threshold and a relaxed agreement fraction.
    pub fn seed_rule(&self) -> OutlierRejection {
        if self.quantile_multiple > 0.0 {
            OutlierRejection::Quantile {
                percentile: self.quantile_percentile,
                multiple: self.quantile_multiple,
            }
        } else {
            OutlierRejection::Threshold {
                half_kernel: 1,
                threshold: self.threshold * 2.0 / 3.0,
                min_match_fraction: (self.min_matches_percent / 100.0) * 0.5 / 0.6,
            }
        }
    }
}

/// Per-tile alignment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiecewiseConfig {
    /// Mean vertical mismatch, in pixels, below which a tile is left alone.
    pub min_misalignment: f64,
    /// Inlier bound of the alignment fit. `None` picks the mode default.
    pub ransac_threshold: Option<f64>,
    pub ransac_iterations: usize,
    /// Inlier bound of the finder's own homography filter.
    pub finder_threshold: f64,
    pub features_per_tile: usize,
    /// Pixels added around a tile before matching features.
    pub margin: usize,
    /// Factor applied to the range derived from aligned correspondences.
    pub search_range_multiplier: f32,
}

impl Default for PiecewiseConfig {
    fn default() -> Self {
        Self {
            min_misalignment: 3.0,
            ransac_threshold: None,
            ransac_iterations: 100,
            finder_threshold: 10.0,
            features_per_tile: 400,
            margin: 50,
            search_range_multiplier: 2.0,
        }
    }
}

impl PiecewiseConfig {
    pub fn ransac_threshold_for(&self, mode: AlignmentMode) -> f64 {
        self.ransac_threshold.unwrap_or(match mode {
            AlignmentMode::AffineEpipolar => 20.0,
            AlignmentMode::Homography | AlignmentMode::None => 3.0,
        })
    }

    pub fn finder_config(&self) -> FinderConfig {
        FinderConfig {
            features_per_tile: self.features_per_tile,
            inlier_threshold: self.finder_threshold,
            ransac_iterations: self.ransac_iterations,
            ..FinderConfig::default()
        }
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub seed_mode: SeedMode,
    pub alignment: AlignmentMode,
    pub cost_function: CostFunction,
    /// Correlation window `[width, height]`, both odd.
    pub kernel_size: [usize; 2],
    /// Parabolic sub-pixel refinement of window correlation.
    pub subpixel: bool,
    /// User-fixed global search range; skips range estimation.
    pub search_range: Option<SearchRange>,
    /// Hard bound every derived range is clipped to.
    pub search_range_limit: Option<SearchRange>,
    pub algorithm: CorrelationAlgorithm,
    pub outlier_rejection: OutlierConfig,
    pub piecewise: PiecewiseConfig,
    /// Output tile edge. Rounded up to a multiple of 16.
    pub tile_size: usize,
    /// Tiles evaluated at once. `0` uses the whole rayon pool.
    pub tile_concurrency: usize,
    /// Fraction of the low-resolution search range added as padding, split
    /// between both sides.
    pub seed_percent_pad: f32,
    /// Soft per-tile matching budget in seconds. `0` disables it.
    pub corr_timeout_secs: f64,
    /// Crop windows the input rasters were cut from.
    pub left_crop: Option<PixelBox>,
    pub right_crop: Option<PixelBox>,
    /// Seed for every random choice. `None` draws from the OS.
    pub ransac_seed: Option<u64>,
    pub compute_low_res_only: bool,
    pub skip_low_res: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed_mode: SeedMode::default(),
            alignment: AlignmentMode::default(),
            cost_function: CostFunction::default(),
            kernel_size: [21, 21],
            subpixel: false,
            search_range: None,
            search_range_limit: None,
            algorithm: CorrelationAlgorithm::default(),
            outlier_rejection: OutlierConfig::default(),
            piecewise: PiecewiseConfig::default(),
            tile_size: 1024,
            tile_concurrency: 0,
            seed_percent_pad: 0.25,
            corr_timeout_secs: 0.0,
            left_crop: None,
            right_crop: None,
            ransac_seed: None,
            compute_low_res_only: false,
            skip_low_res: false,
        }
    }
}

impl Config {
    /// Loads a YAML or JSON file, chosen by extension, and validates it.
    pub fn from_file(path: &Path) -> Result<Config> {
        let config: Config = common::file_format::load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        common::file_format::save(self, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        let [kw, kh] = self.kernel_size;
        if kw == 0 || kh == 0 || kw % 2 == 0 || kh % 2 == 0 {
            return invalid(format!("kernel size must be odd and positive, got {kw}x{kh}"));
        }
        if self.tile_size == 0 {
            return invalid("tile size must be positive".into());
        }
        if !(self.seed_percent_pad.is_finite() && self.seed_percent_pad >= 0.0) {
            return invalid(format!(
                "seed padding must be non-negative, got {}",
                self.seed_percent_pad
            ));
        }
        if !(self.corr_timeout_secs.is_finite() && self.corr_timeout_secs >= 0.0) {
            return invalid(format!(
                "correlation timeout must be non-negative, got {}",
                self.corr_timeout_secs
            ));
        }
        if let Some(range) = &self.search_range
            && range.is_empty()
        {
            return invalid(format!("search range is empty: {range}"));
        }
        if let Some(limit) = &self.search_range_limit
            && limit.is_empty()
        {
            return invalid(format!("search range limit is empty: {limit}"));
        }
        for (side, crop) in [("left", &self.left_crop), ("right", &self.right_crop)] {
            if let Some(crop) = crop
                && crop.is_empty()
            {
                return invalid(format!("{side} crop window is empty: {crop}"));
            }
        }

        let outliers = &self.outlier_rejection;
        if !(0.0..=100.0).contains(&outliers.min_matches_percent) {
            return invalid(format!(
                "min matches percent must be in [0, 100], got {}",
                outliers.min_matches_percent
            ));
        }
        if outliers.quantile_multiple > 0.0
            && !(outliers.quantile_percentile > 0.0 && outliers.quantile_percentile < 1.0)
        {
            return invalid(format!(
                "quantile percentile must be in (0, 1), got {}",
                outliers.quantile_percentile
            ));
        }

        let piecewise = &self.piecewise;
        if piecewise.ransac_iterations == 0 {
            return invalid("alignment RANSAC needs at least one iteration".into());
        }
        if piecewise.search_range_multiplier <= 0.0 {
            return invalid(format!(
                "search range multiplier must be positive, got {}",
                piecewise.search_range_multiplier
            ));
        }
        if let Some(t) = piecewise.ransac_threshold
            && t <= 0.0
        {
            return invalid(format!("alignment RANSAC threshold must be positive, got {t}"));
        }

        if self.compute_low_res_only && self.skip_low_res {
            return invalid("compute_low_res_only and skip_low_res are mutually exclusive".into());
        }
        Ok(())
    }

    /// Tile edge actually used: `tile_size` rounded up to a multiple of 16.
    pub fn effective_tile_size(&self) -> usize {
        self.tile_size.div_ceil(16) * 16
    }

    pub fn effective_tile_concurrency(&self) -> usize {
        if self.tile_concurrency == 0 {
            rayon::current_num_threads()
        } else {
            self.tile_concurrency
        }
    }

    /// Aggregating algorithms need the whole image in one tile.
    pub fn check_tile_size(&self, image_size: (usize, usize)) -> Result<()> {
        let needed = image_size.0.max(image_size.1);
        let tile = self.effective_tile_size();
        if !self.algorithm.is_window() && tile < needed {
            return Err(Error::ConfigMismatch(format!(
                "{:?} needs a tile size of at least {needed}, got {tile}",
                self.algorithm
            )));
        }
        Ok(())
    }

    /// User search range shifted into the frame of the cropped inputs.
    ///
    /// Offsets are measured between full-image coordinates. With only the
    /// left image cropped, a pixel's left coordinate shrinks by the crop
    /// origin so the offset grows by it; a right crop works the other way.
    /// With both crops set the range is used as given.
    pub fn crop_adjusted_search_range(&self) -> Option<SearchRange> {
        let range = self.search_range?;
        let origin = |b: &PixelBox| b.min.as_vec2();
        Some(match (&self.left_crop, &self.right_crop) {
            (Some(left), None) => range.translate(origin(left)),
            (None, Some(right)) => range.translate(-origin(right)),
            _ => range,
        })
    }

    /// The limit as a range, empty when unset.
    pub fn range_limit(&self) -> SearchRange {
        self.search_range_limit.unwrap_or(SearchRange::EMPTY)
    }

    pub fn has_crop(&self) -> bool {
        self.left_crop.is_some() || self.right_crop.is_some()
    }
}
