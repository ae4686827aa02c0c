//! # rastersum-aggregate
//!
//! Weighted sum of congruent raster layers, computed tile by tile.
//!
//! The output plane is split into square tiles (256 pixels by default). For
//! each tile, every layer's window is read and folded into a running sum of
//! `value × multiplier`. A sample is valid when it is finite, inside the
//! policy's [`ValidRange`] (inclusive `[0, 7]` by default) and not the layer's
//! no-data value. Output pixels invalid in any layer are written as the
//! output no-data value; valid pixels keep the raw weighted sum.
//!
//! Tiles are independent, so they run on the rayon pool; writes to the output
//! sink are serialized through a mutex.
//!
//! ```no_run
//! use rastersum_aggregate::{aggregate, AggregationPolicy};
//! use rastersum_grid::GeoTiffEngine;
//! use std::path::Path;
//!
//! let summary = aggregate(
//!     &GeoTiffEngine::new(),
//!     &["forest.tif", "water.tif"],
//!     &[0.2, 0.8],
//!     Path::new("weighted.tif"),
//!     &AggregationPolicy::default(),
//! )?;
//! println!("{} tiles, mean {}", summary.tiles, summary.statistics.mean);
//! # Ok::<(), rastersum_aggregate::AggregateError>(())
//! ```

mod aggregate;
mod error;
mod kernel;
mod policy;

pub use aggregate::{aggregate, AggregationSummary};
pub use error::AggregateError;
pub use policy::{AggregationPolicy, ValidRange, DEFAULT_TILE_SIZE};

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
