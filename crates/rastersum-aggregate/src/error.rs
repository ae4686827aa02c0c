//! Error types for aggregation.

use rastersum_grid::GridError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during an aggregation.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// No input layers were given.
    #[error("At least one input layer is required")]
    NoInputs,

    /// Layers and multipliers are not paired one-to-one.
    #[error("{layers} layers but {multipliers} multipliers")]
    MultiplierCountMismatch {
        /// Number of layers.
        layers: usize,
        /// Number of multipliers.
        multipliers: usize,
    },

    /// A multiplier is NaN or infinite in 32-bit precision.
    #[error("Multiplier {index} is not a finite number: {value}")]
    InvalidMultiplier {
        /// Position of the multiplier.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// The aggregation policy cannot be applied.
    #[error("Invalid aggregation policy: {0}")]
    InvalidPolicy(String),

    /// An input layer could not be opened.
    #[error("Input layer {index} ({path}) is unreadable: {source}")]
    LayerUnreadable {
        /// Position of the layer.
        index: usize,
        /// Path of the layer.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: GridError,
    },

    /// An input layer is not congruent with the first layer.
    #[error("Input layer {index} ({path}) does not match the output grid: {reason}")]
    DimensionMismatch {
        /// Position of the layer.
        index: usize,
        /// Path of the layer.
        path: PathBuf,
        /// What differs.
        reason: String,
    },

    /// The output raster could not be created or finalized.
    #[error("Cannot write output raster {path}: {source}")]
    OutputUnwritable {
        /// Destination path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: GridError,
    },

    /// Reading or writing a tile failed.
    #[error(transparent)]
    Grid(#[from] GridError),
}
