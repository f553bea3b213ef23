//! End-to-end correlation: global search range, seed, then tiles.
//!
//! Every intermediate product is written next to `prefix` so a later run
//! can pick it up:
//!
//! | artifact                   | content                                  |
//! |----------------------------|------------------------------------------|
//! | `<prefix>.match`           | full-resolution correspondences          |
//! | `<prefix>-sub.match`       | correspondences of the subsampled images |
//! | `<prefix>-D_sub.disp`      | seed disparity                           |
//! | `<prefix>-D_sub_spread.disp` | seed spread                            |
//! | `<prefix>-local_hom.txt`   | per-tile right transforms                |
//! | `<prefix>-D.disp`          | final disparity                          |


use std::path::{Path, PathBuf};

use glam::Vec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Config, SeedMode};
use crate::correlator::{CorrelatorInputs, DisparityMosaic, SeededCorrelator};
use crate::correspondence::Correspondence;
use crate::diagnostics::{DiagnosticsSink, NullDiagnostics};
use crate::disparity::{DisparityField, write_disparity};
use crate::error::{Error, Result};
use crate::features::io::{read_matches, write_matches};
use crate::features::{CorrespondenceFinder, FeatureExtractor, FinderConfig};
use crate::homography_table::LocalHomographyTable;
use crate::math::{PixelBox, SearchRange};
use crate::matcher::{Matcher, TimeBudget, calibrate_seconds_per_op};
use crate::raster::{MaskedImage, RasterSource, read_masked};
use crate::search_range::{
    AlignmentMatrices, CorrelationRangeEstimator, CorrespondenceFilter, CorrespondenceInputs,
    HistogramRangeEstimator, range_from_seed,
};
use crate::seed::{
    LowResDisparityStage, SeedArtifacts, SeedField, SeedInputs, TerrainDisparityPredictor,
    homography_scaffold, load_seed,
};

/// Finder settings for the global range. Only gross mismatches are
/// removed here; the histogram percentiles handle the rest.
const RANGE_FINDER: FinderConfig = FinderConfig {
    features_per_tile: 2000,
    ratio: 0.8,
    inlier_threshold: 200.0,
    ransac_iterations: 100,
};

/// Side of the central patch the matcher speed is measured on.
const CALIBRATION_WINDOW: i32 = 128;

/// Full-resolution and subsampled views of one stereo pair.
#[derive(Clone, Copy)]
pub struct StereoInputs<'a> {
    pub left: &'a dyn RasterSource,
    pub right: &'a dyn RasterSource,
    pub left_sub: &'a dyn RasterSource,
    pub right_sub: &'a dyn RasterSource,
    /// Global transforms the pair was aligned with, if any.
    pub alignment_matrices: Option<AlignmentMatrices>,
}

impl StereoInputs<'_> {
    /// Subsampled size over full size, per axis.
    pub fn sub_scale(&self) -> Vec2 {
        let (w, h) = self.left.size();
        let (sw, sh) = self.left_sub.size();
        Vec2::new(sw as f32 / w as f32, sh as f32 / h as f32)
    }
}

/// Where the pipeline reads and writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArtifacts {
    pub matches: PathBuf,
    pub sub_matches: PathBuf,
    pub seed: SeedArtifacts,
    pub disparity: PathBuf,
}

impl PipelineArtifacts {
    pub fn with_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            matches: with_suffix(".match"),
            sub_matches: with_suffix("-sub.match"),
            seed: SeedArtifacts::with_prefix(prefix),
            disparity: with_suffix("-D.disp"),
        }
    }
}

#[derive(Debug)]
pub struct CorrelationOutput {
    /// Global full-resolution range.
    pub search_range: SearchRange,
    pub seed: Option<SeedField>,
    /// `None` when only the seed was requested.
    pub disparity: Option<DisparityField>,
}

pub struct StereoCorrelation<'a> {
    config: &'a Config,
    matcher: &'a dyn Matcher,
    extractor: &'a dyn FeatureExtractor,
    diagnostics: &'a dyn DiagnosticsSink,
    terrain: Option<&'a dyn TerrainDisparityPredictor>,
    external_seed: Option<SeedField>,
    filter: Option<&'a dyn CorrespondenceFilter>,
}

impl<'a> StereoCorrelation<'a> {
    pub fn new(
        config: &'a Config,
        matcher: &'a dyn Matcher,
        extractor: &'a dyn FeatureExtractor,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            matcher,
            extractor,
            diagnostics: &NullDiagnostics,
            terrain: None,
            external_seed: None,
            filter: None,
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: &'a dyn DiagnosticsSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_terrain(mut self, terrain: &'a dyn TerrainDisparityPredictor) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn with_external_seed(mut self, seed: SeedField) -> Self {
        self.external_seed = Some(seed);
        self
    }

    pub fn with_filter(mut self, filter: &'a dyn CorrespondenceFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn run(&self, inputs: &StereoInputs<'_>, prefix: &Path) -> Result<CorrelationOutput> {
        let artifacts = PipelineArtifacts::with_prefix(prefix);
        let config = self.config;
        let size = inputs.left.size();
        let sub_scale = inputs.sub_scale();
        config.check_tile_size(size)?;
        tracing::info!(?size, ?sub_scale, "stereo correlation");

        let left_sub = read_masked(inputs.left_sub, inputs.left_sub.bounds())?;
        let right_sub = read_masked(inputs.right_sub, inputs.right_sub.bounds())?;

        let mut search_range = self.global_search_range(inputs, &artifacts, &left_sub, &right_sub)?;

        let seed = if config.skip_low_res {
            self.cached_seed(&artifacts.seed)?
        } else {
            let mut stage = LowResDisparityStage::new(config, self.matcher);
            if let Some(terrain) = self.terrain {
                stage = stage.with_terrain(terrain);
            }
            if let Some(seed) = &self.external_seed {
                stage = stage.with_external(seed.clone());
            }
            let seed_inputs = SeedInputs {
                left_sub: &left_sub,
                right_sub: &right_sub,
                sub_scale,
                search_range,
            };
            stage.run(&seed_inputs, &artifacts.seed)?
        };

        if let Some(seed) = &seed
            && let Some(range) = range_from_seed(&seed.disparity, sub_scale)
        {
            search_range = range.clip(&config.range_limit());
            tracing::info!(range = %search_range, "search range from seed");
        }

        let table = homography_scaffold(config, size, &artifacts.seed.homography_table)?;

        if config.compute_low_res_only {
            tracing::info!("low-resolution stage only, stopping");
            return Ok(CorrelationOutput {
                search_range,
                seed,
                disparity: None,
            });
        }

        let disparity = self.correlate(inputs, seed.as_ref(), search_range, table.as_ref())?;
        write_disparity(&artifacts.disparity, &disparity, config.algorithm.output_numeric())?;
        if let Some(table) = &table {
            table.save(&artifacts.seed.homography_table)?;
        }
        tracing::info!(
            path = %artifacts.disparity.display(),
            valid = disparity.valid_count(),
            "disparity written"
        );

        Ok(CorrelationOutput {
            search_range,
            seed,
            disparity: Some(disparity),
        })
    }

    fn correlate(
        &self,
        inputs: &StereoInputs<'_>,
        seed: Option<&SeedField>,
        search_range: SearchRange,
        table: Option<&LocalHomographyTable>,
    ) -> Result<DisparityField> {
        let (w, h) = inputs.left.size();
        let correlator_inputs = CorrelatorInputs {
            left: inputs.left,
            right: inputs.right,
            seed,
            sub_scale: inputs.sub_scale(),
            search_range,
        };
        let mut correlator = SeededCorrelator::new(self.config, correlator_inputs, self.matcher, self.diagnostics)?
            .with_budget(self.tile_budget(inputs)?);
        if let Some(table) = table {
            correlator = correlator.with_alignment(self.extractor, table);
        }

        let mosaic = DisparityMosaic::new(w, h);
        correlator.run(&mosaic)?;
        let field = mosaic.into_field();
        Ok(if self.config.algorithm.is_window() {
            field.rounded()
        } else {
            field
        })
    }

    /// Per-tile budget from the configured timeout and a short calibration
    /// run on the center of the images.
    fn tile_budget(&self, inputs: &StereoInputs<'_>) -> Result<Option<TimeBudget>> {
        if self.config.corr_timeout_secs <= 0.0 {
            return Ok(None);
        }
        let (w, h) = inputs.left.size();
        let side = CALIBRATION_WINDOW;
        let center = PixelBox::new(w as i32 / 2 - side / 2, h as i32 / 2 - side / 2, side, side)
            .intersect(&inputs.left.bounds());
        let left = read_masked(inputs.left, center)?;
        let right = read_masked(inputs.right, center)?;
        let seconds_per_op = calibrate_seconds_per_op(
            self.matcher,
            &left,
            &right,
            self.config.kernel_size,
            self.config.cost_function,
        )?;
        Ok(Some(TimeBudget::new(self.config.corr_timeout_secs, seconds_per_op)))
    }

    /// User range if given, otherwise the histogram window of the
    /// correspondences; clipped to the limit. Without correspondences the
    /// subsampled pair is correlated over the limit instead. Terrain and
    /// external seeds carry their own range and get an empty one here.
    fn global_search_range(
        &self,
        inputs: &StereoInputs<'_>,
        artifacts: &PipelineArtifacts,
        left_sub: &MaskedImage,
        right_sub: &MaskedImage,
    ) -> Result<SearchRange> {
        let limit = self.config.range_limit();
        if let Some(range) = self.config.crop_adjusted_search_range() {
            tracing::info!(range = %range, "user search range");
            return Ok(range.clip(&limit));
        }
        if matches!(self.config.seed_mode, SeedMode::Terrain | SeedMode::External) {
            return Ok(SearchRange::EMPTY);
        }

        let (pairs, scale) = match self.correspondences(inputs, artifacts, left_sub, right_sub) {
            Ok(found) => found,
            Err(Error::MissingInput(reason)) if !limit.is_empty() => {
                tracing::warn!(%reason, limit = %limit, "estimating search range by correlation");
                let estimator = CorrelationRangeEstimator {
                    matcher: self.matcher,
                    kernel: self.config.kernel_size,
                    cost: self.config.cost_function,
                };
                let range = estimator.estimate(left_sub, right_sub, &limit, inputs.sub_scale())?;
                return Ok(range.clip(&limit));
            }
            Err(err) => return Err(err),
        };
        let mut estimate_inputs = CorrespondenceInputs::new(&pairs, scale);
        estimate_inputs.alignment = inputs.alignment_matrices.as_ref();
        estimate_inputs.filter = self.filter;
        let range = HistogramRangeEstimator::default().estimate(&estimate_inputs)?;
        Ok(range.clip(&limit))
    }

    /// Cached full-resolution matches, else cached or freshly computed
    /// matches of the subsampled pair, with their scale.
    fn correspondences(
        &self,
        inputs: &StereoInputs<'_>,
        artifacts: &PipelineArtifacts,
        left_sub: &MaskedImage,
        right_sub: &MaskedImage,
    ) -> Result<(Vec<Correspondence>, f64)> {
        let sub_scale = inputs.sub_scale().x as f64;
        if artifacts.matches.exists() {
            tracing::info!(path = %artifacts.matches.display(), "loading correspondences");
            return Ok((read_matches(&artifacts.matches)?, 1.0));
        }
        if artifacts.sub_matches.exists() {
            tracing::info!(path = %artifacts.sub_matches.display(), "loading correspondences");
            return Ok((read_matches(&artifacts.sub_matches)?, sub_scale));
        }

        let finder = CorrespondenceFinder::new(self.extractor, RANGE_FINDER);
        let mut rng = match self.config.ransac_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let pairs = finder
            .find(left_sub, right_sub, "global", self.diagnostics, &mut rng)
            .ok_or_else(|| {
                Error::MissingInput(format!(
                    "no correspondences in {} and none could be computed",
                    artifacts.sub_matches.display()
                ))
            })?;
        write_matches(&artifacts.sub_matches, &pairs)?;
        Ok((pairs, sub_scale))
    }

    fn cached_seed(&self, artifacts: &SeedArtifacts) -> Result<Option<SeedField>> {
        if self.config.seed_mode == SeedMode::Disabled {
            return Ok(None);
        }
        if !artifacts.disparity.exists() {
            return Err(Error::MissingInput(format!(
                "low-resolution stage skipped but {} is missing",
                artifacts.disparity.display()
            )));
        }
        let seed = load_seed(artifacts)?;
        seed.check_spread()?;
        Ok(Some(seed))
    }
}
