//! Stage one: the low-resolution seed disparity.
//!
//! The seed bounds the per-tile search at full resolution. It is computed
//! on the subsampled images, predicted from terrain, or supplied from
//! outside, and is cached on disk between runs.


use std::path::{Path, PathBuf};

use glam::Vec2;

use crate::config::{Config, SeedMode};
use crate::disparity::{DisparityField, DisparityNumeric, read_disparity, reject_outliers, write_disparity};
use crate::error::{Error, Result};
use crate::homography_table::LocalHomographyTable;
use crate::math::{PixelBox, SearchRange, grid_dims};
use crate::matcher::{MatchRequest, Matcher, TimeBudget, calibrate_seconds_per_op};
use crate::raster::MaskedImage;

/// Stage one may run this many times longer than a single tile.
const SEED_TIMEOUT_FACTOR: f64 = 5.0;

/// Predicts disparity from terrain and camera geometry.
pub trait TerrainDisparityPredictor: Send + Sync {
    /// Disparity and its spread on a `size` grid at `sub_scale` of the full
    /// resolution.
    fn predict(&self, size: (usize, usize), sub_scale: Vec2) -> Result<SeedField>;
}

/// Seed disparity with an optional per-pixel uncertainty.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedField {
    pub disparity: DisparityField,
    /// Absolute uncertainty of each seed offset, same size as `disparity`.
    pub spread: Option<DisparityField>,
}

impl SeedField {
    pub fn new(disparity: DisparityField) -> Self {
        Self {
            disparity,
            spread: None,
        }
    }

    pub fn with_spread(mut self, spread: DisparityField) -> Self {
        self.spread = Some(spread);
        self
    }

    pub fn check_spread(&self) -> Result<()> {
        match &self.spread {
            Some(spread) if spread.size() != self.disparity.size() => {
                Err(Error::ConfigMismatch(format!(
                    "spread is {:?} but the seed is {:?}",
                    spread.size(),
                    self.disparity.size()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Largest spread magnitude per axis, zero without a spread.
    pub fn max_spread(&self) -> Vec2 {
        self.spread
            .as_ref()
            .and_then(DisparityField::max_abs_offset)
            .unwrap_or(Vec2::ZERO)
    }
}

/// File locations of the stage-one artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedArtifacts {
    pub disparity: PathBuf,
    pub spread: PathBuf,
    pub homography_table: PathBuf,
}

impl SeedArtifacts {
    pub fn with_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            disparity: with_suffix("-D_sub.disp"),
            spread: with_suffix("-D_sub_spread.disp"),
            homography_table: with_suffix("-local_hom.txt"),
        }
    }
}

/// Subsampled inputs of stage one.
#[derive(Clone, Copy)]
pub struct SeedInputs<'a> {
    pub left_sub: &'a MaskedImage,
    pub right_sub: &'a MaskedImage,
    /// Subsampled size over full size, per axis.
    pub sub_scale: Vec2,
    /// Full-resolution global search range.
    pub search_range: SearchRange,
}

pub struct LowResDisparityStage<'a> {
    config: &'a Config,
    matcher: &'a dyn Matcher,
    terrain: Option<&'a dyn TerrainDisparityPredictor>,
    external: Option<SeedField>,
}

impl<'a> LowResDisparityStage<'a> {
    pub fn new(config: &'a Config, matcher: &'a dyn Matcher) -> Self {
        Self {
            config,
            matcher,
            terrain: None,
            external: None,
        }
    }

    pub fn with_terrain(mut self, terrain: &'a dyn TerrainDisparityPredictor) -> Self {
        self.terrain = Some(terrain);
        self
    }

    pub fn with_external(mut self, seed: SeedField) -> Self {
        self.external = Some(seed);
        self
    }

    /// Produces the seed, reusing the cached artifacts when allowed, and
    /// writes them back. `None` when seeding is disabled.
    pub fn run(&self, inputs: &SeedInputs<'_>, artifacts: &SeedArtifacts) -> Result<Option<SeedField>> {
        let mode = self.config.seed_mode;
        if mode == SeedMode::Disabled {
            tracing::info!("seed disabled");
            return Ok(None);
        }

        if mode != SeedMode::External
            && let Some(cached) = self.cached(artifacts)
        {
            cached.check_spread()?;
            return Ok(Some(cached));
        }

        let seed = match mode {
            SeedMode::Disabled => return Ok(None),
            SeedMode::Correlation => SeedField::new(self.correlate(inputs)?),
            SeedMode::Terrain => {
                let terrain = self.terrain.ok_or_else(|| {
                    Error::MissingInput("terrain seed requested without a predictor".into())
                })?;
                let seed = terrain.predict(inputs.left_sub.size(), inputs.sub_scale)?;
                if seed.spread.is_none() {
                    return Err(Error::MissingInput(
                        "terrain seed needs a spread field".into(),
                    ));
                }
                seed
            }
            SeedMode::External => self.external_seed(artifacts)?,
        };
        seed.check_spread()?;

        tracing::info!(
            size = ?seed.disparity.size(),
            valid = seed.disparity.valid_count(),
            spread = seed.spread.is_some(),
            "seed ready"
        );
        write_disparity(&artifacts.disparity, &seed.disparity, DisparityNumeric::Float)?;
        if let Some(spread) = &seed.spread {
            write_disparity(&artifacts.spread, spread, DisparityNumeric::Float)?;
        }
        Ok(Some(seed))
    }

    /// Cached seed, unless a crop override makes it stale or it fails to
    /// parse.
    fn cached(&self, artifacts: &SeedArtifacts) -> Option<SeedField> {
        if self.config.has_crop() || !artifacts.disparity.exists() {
            return None;
        }
        match load_seed(artifacts) {
            Ok(seed) => {
                tracing::info!(path = %artifacts.disparity.display(), "reusing cached seed");
                Some(seed)
            }
            Err(err) => {
                tracing::warn!(%err, "cached seed unreadable, recomputing");
                None
            }
        }
    }

    fn external_seed(&self, artifacts: &SeedArtifacts) -> Result<SeedField> {
        let seed = match &self.external {
            Some(seed) => seed.clone(),
            None if artifacts.disparity.exists() => load_seed(artifacts)?,
            None => {
                return Err(Error::MissingInput(format!(
                    "external seed {} not found",
                    artifacts.disparity.display()
                )));
            }
        };
        if seed.spread.is_none() {
            return Err(Error::MissingInput(format!(
                "external seed needs a spread ({})",
                artifacts.spread.display()
            )));
        }
        Ok(seed)
    }

    /// Correlates the whole subsampled pair and filters outliers.
    fn correlate(&self, inputs: &SeedInputs<'_>) -> Result<DisparityField> {
        let range = padded_seed_range(&inputs.search_range, inputs.sub_scale, self.config.seed_percent_pad);
        tracing::info!(range = %range, "correlating subsampled images");

        let budget = if self.config.corr_timeout_secs > 0.0 {
            let seconds_per_op = calibrate_seconds_per_op(
                self.matcher,
                inputs.left_sub,
                inputs.right_sub,
                self.config.kernel_size,
                self.config.cost_function,
            )?;
            Some(TimeBudget::new(
                SEED_TIMEOUT_FACTOR * self.config.corr_timeout_secs,
                seconds_per_op,
            ))
        } else {
            None
        };

        let request = MatchRequest {
            left: inputs.left_sub,
            right: inputs.right_sub,
            roi: PixelBox::from_size(inputs.left_sub.width(), inputs.left_sub.height()),
            search_range: range,
            kernel: self.config.kernel_size,
            cost: self.config.cost_function,
            budget,
        };
        let raw = self.matcher.correlate(&request)?;
        let filtered = reject_outliers(&raw, &self.config.outlier_rejection.seed_rule());
        tracing::debug!(
            before = raw.valid_count(),
            after = filtered.valid_count(),
            "seed outlier rejection"
        );
        Ok(filtered)
    }
}

/// Full-resolution `range` brought to the subsampled grid and padded by
/// `pad / 2` of its size on each side.
pub fn padded_seed_range(range: &SearchRange, sub_scale: Vec2, pad: f32) -> SearchRange {
    let scaled = range.scale(sub_scale);
    scaled.expand(scaled.size() * (pad * 0.5)).round_outward()
}

/// Reads the seed and, when present, its spread.
pub fn load_seed(artifacts: &SeedArtifacts) -> Result<SeedField> {
    let disparity = read_disparity(&artifacts.disparity)?;
    let spread = if artifacts.spread.exists() {
        Some(read_disparity(&artifacts.spread)?)
    } else {
        None
    };
    Ok(SeedField { disparity, spread })
}

/// Local homography table for a `size` image split into `tile_size` tiles.
///
/// A cached table of the right shape is reused; otherwise an identity
/// table is created and saved. `None` when alignment is off.
pub fn homography_scaffold(
    config: &Config,
    size: (usize, usize),
    path: &Path,
) -> Result<Option<LocalHomographyTable>> {
    if !config.alignment.is_enabled() {
        return Ok(None);
    }
    let (rows, cols) = grid_dims(size.0, size.1, config.effective_tile_size());

    if !config.has_crop() && path.exists() {
        match LocalHomographyTable::load(path) {
            Ok(table) if table.rows() == rows && table.cols() == cols => {
                tracing::info!(path = %path.display(), "reusing local homography table");
                return Ok(Some(table));
            }
            Ok(table) => tracing::warn!(
                cached = ?(table.rows(), table.cols()),
                expected = ?(rows, cols),
                "local homography table has the wrong shape, recreating"
            ),
            Err(err) => tracing::warn!(%err, "local homography table unreadable, recreating"),
        }
    }

    let table = LocalHomographyTable::new_identity(rows, cols);
    table.save(path)?;
    Ok(Some(table))
}
