use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures of the correlation pipeline.
///
/// Per-tile fitting and quality-gate failures are not errors: they fall back
/// to identity alignment and are only logged.
#[derive(Debug, Error)]
pub enum Error {
    /// A required artifact is absent and cannot be recomputed.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Inputs or options contradict each other (spread vs seed size, tile
    /// size vs algorithm, ...).
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No usable correspondences survived prefiltering.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed artifact {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("failed to load configuration")]
    ConfigFile(#[from] common::FileFormatError),

    #[error("matcher failed: {0}")]
    Matcher(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
