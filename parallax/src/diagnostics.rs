//! Optional debug output. The pipeline reports intermediate data to a
//! [`DiagnosticsSink`]; nothing is written unless a sink that writes is
//! installed.

use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::correspondence::Correspondence;
use crate::features::io::write_matches;
use crate::raster::MaskedImage;

/// Which step of correspondence finding a match set comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    /// Descriptor matches before geometric filtering.
    Raw,
    /// Matches that survived the homography filter.
    Filtered,
}

impl MatchStage {
    fn suffix(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Filtered => "filtered",
        }
    }
}

pub trait DiagnosticsSink: Send + Sync {
    fn correspondences(&self, _label: &str, _stage: MatchStage, _pairs: &[Correspondence]) {}

    /// Left and right crops after piecewise alignment warped them.
    fn aligned_tile(&self, _label: &str, _left: &MaskedImage, _right: &MaskedImage) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {}

/// Writes match files and 8-bit PNG previews into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDiagnostics {
    dir: PathBuf,
}

impl DirectoryDiagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> bool {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create diagnostics directory");
            return false;
        }
        true
    }
}

impl DiagnosticsSink for DirectoryDiagnostics {
    fn correspondences(&self, label: &str, stage: MatchStage, pairs: &[Correspondence]) {
        if !self.ensure_dir() {
            return;
        }
        let path = self.dir.join(format!("{label}-{}.match", stage.suffix()));
        if let Err(e) = write_matches(&path, pairs) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write diagnostic matches");
        }
    }

    fn aligned_tile(&self, label: &str, left: &MaskedImage, right: &MaskedImage) {
        if !self.ensure_dir() {
            return;
        }
        for (side, image) in [("left", left), ("right", right)] {
            let path = self.dir.join(format!("{label}-aligned-{side}.png"));
            if let Err(e) = to_preview(image).save(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write preview");
            }
        }
    }
}

/// Stretches valid pixels to 1..=255; invalid pixels are black.
pub fn to_preview(image: &MaskedImage) -> GrayImage {
    let (lo, hi) = image
        .pixels
        .iter()
        .zip(image.valid.iter())
        .filter(|(_, v)| **v)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (&p, _)| {
            (lo.min(p), hi.max(p))
        });
    let scale = if hi > lo { 254.0 / (hi - lo) } else { 0.0 };

    GrayImage::from_fn(image.width() as u32, image.height() as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if !image.is_valid(x, y) {
            return image::Luma([0]);
        }
        let v = 1.0 + (image.pixels[(x, y)] - lo) * scale;
        image::Luma([v.round().clamp(1.0, 255.0) as u8])
    })
}
