//! Error types for the grid crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading, writing or warping raster artifacts.
#[derive(Debug, Error)]
pub enum GridError {
    /// The path does not resolve to a readable raster artifact.
    #[error("Raster artifact unreadable: {path}: {reason}")]
    ArtifactUnreadable {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encode/decode error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// A pixel window extends past the raster grid.
    #[error("Window {x},{y} {width}x{height} is outside a {grid_width}x{grid_height} grid")]
    WindowOutOfBounds {
        /// Window column offset.
        x: u32,
        /// Window row offset.
        y: u32,
        /// Window width.
        width: u32,
        /// Window height.
        height: u32,
        /// Grid width.
        grid_width: u32,
        /// Grid height.
        grid_height: u32,
    },

    /// Buffer length does not match the window it is written to.
    #[error("Tile buffer holds {actual} samples, window needs {expected}")]
    TileSizeMismatch {
        /// Samples required by the window.
        expected: usize,
        /// Samples supplied.
        actual: usize,
    },

    /// The engine cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The output artifact could not be created.
    #[error("Cannot create output raster {path}: {reason}")]
    OutputUnwritable {
        /// Destination path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
}

impl GridError {
    pub(crate) fn unreadable(path: &std::path::Path, reason: impl ToString) -> Self {
        GridError::ArtifactUnreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
