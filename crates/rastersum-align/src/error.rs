//! Error types for alignment.

use rastersum_grid::GridError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole alignment call.
///
/// Problems with individual layers never surface here; they are recorded in
/// the [`crate::AlignmentReport`] instead.
#[derive(Debug, Error)]
pub enum AlignError {
    /// The first input, which defines the reference grid, cannot be read.
    #[error("Reference layer {path} is unreadable: {source}")]
    ReferenceUnreadable {
        /// Path of the reference layer.
        path: PathBuf,
        /// Underlying read failure.
        #[source]
        source: GridError,
    },
}
