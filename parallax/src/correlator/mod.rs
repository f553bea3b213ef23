//! Stage two: full-resolution correlation, one tile at a time.
//!
//! Tiles are independent. Each derives its own search range from the
//! seed, optionally realigns its crops, runs the matcher and maps the
//! result back into the tile frame. [`SeededCorrelator::run`] evaluates the
//! whole grid with a bounded number of tiles in flight.


#[cfg(feature = "bench")]
pub mod bench;

use common::parallel::try_par_map_limited;
use glam::{IVec2, Vec2};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::alignment::{AlignmentOutcome, PiecewiseAligner};
use crate::config::Config;
use crate::diagnostics::DiagnosticsSink;
use crate::disparity::DisparityField;
use crate::error::{Error, Result};
use crate::features::FeatureExtractor;
use crate::homography_table::LocalHomographyTable;
use crate::math::{DMat3, PixelBox, SearchRange, Tile, tile_grid};
use crate::matcher::{MatchRequest, Matcher, TimeBudget};
use crate::raster::{MaskedImage, RasterSource, read_masked};
use crate::seed::SeedField;
use crate::warp::{reconcile_disparity, warp_masked};

/// Receives finished tiles. Tiles arrive in any order and possibly from
/// several threads at once.
pub trait DisparitySink: Send + Sync {
    fn write_tile(&self, tile: &Tile, field: &DisparityField) -> Result<()>;
}

/// In-memory sink assembling the full disparity field.
pub struct DisparityMosaic {
    field: Mutex<DisparityField>,
}

impl DisparityMosaic {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            field: Mutex::new(DisparityField::new_invalid(width, height)),
        }
    }

    pub fn into_field(self) -> DisparityField {
        self.field.into_inner()
    }
}

impl DisparitySink for DisparityMosaic {
    fn write_tile(&self, tile: &Tile, field: &DisparityField) -> Result<()> {
        self.field.lock().paste(field, tile.bbox.min);
        Ok(())
    }
}

/// Images and stage-one results shared by every tile.
#[derive(Clone, Copy)]
pub struct CorrelatorInputs<'a> {
    pub left: &'a dyn RasterSource,
    pub right: &'a dyn RasterSource,
    pub seed: Option<&'a SeedField>,
    /// Seed size over full size, per axis.
    pub sub_scale: Vec2,
    /// Range searched by tiles without a seed.
    pub search_range: SearchRange,
}

pub struct SeededCorrelator<'a> {
    config: &'a Config,
    inputs: CorrelatorInputs<'a>,
    matcher: &'a dyn Matcher,
    diagnostics: &'a dyn DiagnosticsSink,
    aligner: Option<PiecewiseAligner<'a>>,
    table: Option<&'a LocalHomographyTable>,
    budget: Option<TimeBudget>,
}

impl<'a> SeededCorrelator<'a> {
    pub fn new(
        config: &'a Config,
        inputs: CorrelatorInputs<'a>,
        matcher: &'a dyn Matcher,
        diagnostics: &'a dyn DiagnosticsSink,
    ) -> Result<Self> {
        config.validate()?;
        config.check_tile_size(inputs.left.size())?;
        if let Some(seed) = inputs.seed {
            seed.check_spread()?;
        }
        Ok(Self {
            config,
            inputs,
            matcher,
            diagnostics,
            aligner: None,
            table: None,
            budget: None,
        })
    }

    /// Enables per-tile realignment; accepted right transforms are recorded
    /// in `table`.
    pub fn with_alignment(
        mut self,
        extractor: &'a dyn FeatureExtractor,
        table: &'a LocalHomographyTable,
    ) -> Self {
        if self.config.alignment.is_enabled() {
            self.aligner = Some(PiecewiseAligner::new(
                self.config.alignment,
                self.config.piecewise,
                extractor,
            ));
            self.table = Some(table);
        }
        self
    }

    pub fn with_budget(mut self, budget: Option<TimeBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn tiles(&self) -> Vec<Tile> {
        let (w, h) = self.inputs.left.size();
        tile_grid(w, h, self.config.effective_tile_size())
    }

    /// Tiles evaluated at once. Aggregating and self-threaded matchers run
    /// alone.
    pub fn concurrency(&self) -> usize {
        if !self.config.algorithm.is_window() || self.matcher.is_multithreaded() {
            1
        } else {
            self.config.effective_tile_concurrency()
        }
    }

    /// Evaluates every tile and hands it to `sink`. Stops at the first
    /// fatal error.
    pub fn run(&self, sink: &dyn DisparitySink) -> Result<()> {
        let tiles = self.tiles();
        let concurrency = self.concurrency();
        tracing::info!(tiles = tiles.len(), concurrency, "correlating tiles");

        try_par_map_limited(&tiles, concurrency, |tile| {
            let field = self.compute_tile(tile)?;
            sink.write_tile(tile, &field)
        })?;
        Ok(())
    }

    /// Disparity of one tile, sized like `tile.bbox`.
    pub fn compute_tile(&self, tile: &Tile) -> Result<DisparityField> {
        let label = tile.label();
        let (w, h) = tile.bbox.size();
        let Some(range) = self.tile_range(&tile.bbox) else {
            tracing::debug!(tile = %label, "no seed support, tile left invalid");
            return Ok(DisparityField::new_invalid(w, h));
        };

        if let Some(aligner) = &self.aligner {
            return self.compute_aligned(tile, aligner, range);
        }
        self.compute_native(tile, &range)
    }

    /// Full-resolution search range of `bbox`: from the seed when there is
    /// one, the global range otherwise, clipped to the limit. `None` when
    /// nothing is left to search.
    pub fn tile_range(&self, bbox: &PixelBox) -> Option<SearchRange> {
        let limit = self.config.range_limit();
        let range = match self.inputs.seed {
            Some(seed) => seed_tile_range(seed, bbox, self.inputs.sub_scale)?,
            None => self.inputs.search_range,
        };
        let range = range.clip(&limit);
        (!range.is_empty()).then_some(range)
    }

    fn compute_native(&self, tile: &Tile, range: &SearchRange) -> Result<DisparityField> {
        let window = match_window(&tile.bbox, range, self.config.kernel_size);
        let left = read_masked(self.inputs.left, window)?;
        let right = read_masked(self.inputs.right, window)?;
        let roi = tile.bbox.translate(-window.min);
        self.correlate(&left, &right, roi, range)
    }

    fn compute_aligned(
        &self,
        tile: &Tile,
        aligner: &PiecewiseAligner<'_>,
        range: SearchRange,
    ) -> Result<DisparityField> {
        let label = tile.label();
        let margin = self.config.piecewise.margin as i32;
        let crop = tile.bbox.expand(margin).intersect(&self.inputs.left.bounds());
        let left = read_masked(self.inputs.left, crop)?;
        let right = read_masked(self.inputs.right, crop)?;

        let mut rng = self.tile_rng(tile);
        let outcome = aligner.align(&left, &right, &range, &label, self.diagnostics, &mut rng);
        let warped = if outcome.is_identity() {
            None
        } else {
            let field = self.correlate_warped(&label, &left, &right, &outcome)?;
            if field.is_none() {
                tracing::warn!(tile = %label, "aligned transforms not invertible, matching unaligned");
            }
            field
        };

        // Cached tables may hold a transform from an earlier run.
        let Some(field) = warped else {
            self.record_transform(tile, DMat3::identity());
            return self.compute_native(tile, &range);
        };
        self.record_transform(tile, outcome.right.matrix);
        let in_crop = tile.bbox.translate(-crop.min);
        Ok(field.crop(&in_crop))
    }

    fn record_transform(&self, tile: &Tile, matrix: DMat3) {
        if let Some(table) = self.table {
            table.set(tile.row, tile.col, matrix);
        }
    }

    /// Matches the warped crops and reconciles the result into the crop
    /// frame. `None` when a transform cannot be inverted.
    fn correlate_warped(
        &self,
        label: &str,
        left: &MaskedImage,
        right: &MaskedImage,
        outcome: &AlignmentOutcome,
    ) -> Result<Option<DisparityField>> {
        let (Some(left_w), Some(right_w)) = (
            warp_masked(left, &outcome.left, outcome.size),
            warp_masked(right, &outcome.right, outcome.size),
        ) else {
            return Ok(None);
        };
        self.diagnostics.aligned_tile(label, &left_w, &right_w);
        let range = outcome.search_range.clip(&self.config.range_limit());
        if range.is_empty() {
            return Ok(Some(DisparityField::new_invalid(left.width(), left.height())));
        }
        let canvas = PixelBox::from_size(outcome.size.0, outcome.size.1);
        let warped = self.correlate(&left_w, &right_w, canvas, &range)?;
        Ok(reconcile_disparity(&warped, &outcome.left, &outcome.right, left.size()))
    }

    fn correlate(
        &self,
        left: &MaskedImage,
        right: &MaskedImage,
        roi: PixelBox,
        range: &SearchRange,
    ) -> Result<DisparityField> {
        let request = MatchRequest {
            left,
            right,
            roi,
            search_range: *range,
            kernel: self.config.kernel_size,
            cost: self.config.cost_function,
            budget: self.budget,
        };
        let field = self.matcher.correlate(&request)?;
        if field.size() != roi.size() {
            return Err(Error::Matcher(format!(
                "matcher returned {:?} for a {:?} region",
                field.size(),
                roi.size()
            )));
        }
        Ok(field)
    }

    /// Per-tile stream, reproducible when a RANSAC seed is configured.
    fn tile_rng(&self, tile: &Tile) -> ChaCha8Rng {
        match self.config.ransac_seed {
            Some(seed) => {
                let cols = self.tiles_per_row() as u64;
                ChaCha8Rng::seed_from_u64(
                    seed.wrapping_add(tile.row as u64 * cols + tile.col as u64),
                )
            }
            None => ChaCha8Rng::from_os_rng(),
        }
    }

    fn tiles_per_row(&self) -> usize {
        self.inputs.left.size().0.div_ceil(self.config.effective_tile_size())
    }
}

/// Search range a tile inherits from the seed around it, in full-resolution
/// offsets. `None` when the seed has no valid pixel near the tile.
pub fn seed_tile_range(seed: &SeedField, bbox: &PixelBox, sub_scale: Vec2) -> Option<SearchRange> {
    let (sw, sh) = seed.disparity.size();
    let seed_box = bbox
        .scale_outward(sub_scale.as_dvec2())
        .expand(1)
        .intersect(&PixelBox::from_size(sw, sh));
    if seed_box.is_empty() {
        return None;
    }

    let local = seed.disparity.crop(&seed_box).range();
    if local.is_empty() {
        return None;
    }
    let spread = seed
        .spread
        .as_ref()
        .and_then(|s| s.crop(&seed_box).max_abs_offset())
        .unwrap_or(Vec2::ZERO);

    let range = local
        .expand(spread)
        .round_outward()
        .expand(Vec2::ONE)
        .scale_outward(Vec2::ONE / sub_scale);
    Some(range)
}

/// Region both crops are read from so every candidate window of `bbox`
/// lies inside it.
pub fn match_window(bbox: &PixelBox, range: &SearchRange, kernel: [usize; 2]) -> PixelBox {
    let lo = range.min.floor().as_ivec2();
    let hi = range.max.ceil().as_ivec2();
    let half = IVec2::new((kernel[0] / 2) as i32, (kernel[1] / 2) as i32);
    bbox.union(&bbox.translate(lo))
        .union(&bbox.translate(hi))
        .expand_xy(half)
}
