//! Parallax - seeded, tile-parallel stereo disparity correlation.
//!
//! Computes dense disparity between a rectified stereo pair in two stages:
//! - a coarse seed disparity on subsampled images bounds the search
//! - full-resolution tiles are matched inside that bound, optionally after
//!   a per-tile homography or affine-epipolar realignment
//!
//! Images are read tile by tile through [`RasterSource`], so inputs never
//! have to fit in memory.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use parallax::{BlockMatcher, Config, HarrisPatchExtractor, StereoCorrelation, StereoInputs};
//!
//! let config = Config::from_file("stereo.yaml".as_ref())?;
//! let matcher = BlockMatcher::new(config.subpixel);
//! let extractor = HarrisPatchExtractor::default();
//!
//! let inputs = StereoInputs {
//!     left: &left,
//!     right: &right,
//!     left_sub: &left_sub,
//!     right_sub: &right_sub,
//!     alignment_matrices: None,
//! };
//! let output = StereoCorrelation::new(&config, &matcher, &extractor)?
//!     .run(&inputs, "out/run".as_ref())?;
//! ```

pub mod alignment;
pub mod config;
pub mod correlator;
pub mod correspondence;
pub mod diagnostics;
pub mod disparity;
mod error;
pub mod features;
pub mod homography_table;
pub mod math;
pub mod matcher;
pub mod pipeline;
pub mod ransac;
pub mod raster;
pub mod search_range;
pub mod seed;
pub mod transform;
pub mod warp;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

// ============================================================================
// Pipeline
// ============================================================================

pub use config::{AlignmentMode, Config, CorrelationAlgorithm, CostFunction, SeedMode};
pub use pipeline::{CorrelationOutput, PipelineArtifacts, StereoCorrelation, StereoInputs};

// ============================================================================
// Stages
// ============================================================================

pub use alignment::{AlignmentOutcome, PiecewiseAligner, QualityVerdict};
pub use correlator::{DisparityMosaic, DisparitySink, SeededCorrelator};
pub use seed::{LowResDisparityStage, SeedField, TerrainDisparityPredictor};

// ============================================================================
// Data and collaborators
// ============================================================================

pub use correspondence::Correspondence;
pub use diagnostics::{DiagnosticsSink, DirectoryDiagnostics, NullDiagnostics};
pub use disparity::{DisparityField, DisparityPixel};
pub use features::{FeatureExtractor, HarrisPatchExtractor};
pub use homography_table::LocalHomographyTable;
pub use math::{DMat3, PixelBox, SearchRange, Tile};
pub use matcher::{BlockMatcher, MatchRequest, Matcher, TimeBudget};
pub use raster::{MaskedImage, MemoryRaster, RasterSource};
pub use search_range::{AlignmentMatrices, CorrespondenceFilter};
pub use transform::{Transform, TransformKind};
