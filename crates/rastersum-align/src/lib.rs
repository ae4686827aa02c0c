//! # rastersum-align
//!
//! Makes a batch of raster layers spatially congruent with a reference layer.
//!
//! The first input is the reference. Each other layer is reprojected into the
//! reference CRS when the CRS differs, then resampled onto the reference grid
//! (nearest-neighbour, the layer's own no-data carried over) when its
//! dimensions or geotransform differ. Adjusted copies are written to a
//! caller-supplied scratch directory; inputs are never modified.
//!
//! Layers that cannot be aligned do not fail the call. Each input gets a
//! [`LayerOutcome`] in the returned [`AlignmentReport`], and only the layers
//! verified congruent are offered by [`AlignmentReport::aligned_paths`].
//!
//! ```no_run
//! use rastersum_align::AlignmentCoordinator;
//! use rastersum_grid::GeoTiffEngine;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let coordinator = AlignmentCoordinator::new(Arc::new(GeoTiffEngine::new()))
//!     .with_timeout(Duration::from_secs(60));
//! let report = coordinator.align(&["a.tif", "b.tif"], Path::new("scratch"))?;
//! println!("aligned: {:?}, dropped: {:?}", report.aligned_paths(), report.dropped());
//! # Ok::<(), rastersum_align::AlignError>(())
//! ```

mod coordinator;
mod error;
mod report;

pub use coordinator::{AlignmentCoordinator, DEFAULT_WARP_TIMEOUT};
pub use error::AlignError;
pub use report::{AlignAction, AlignmentReport, LayerFailure, LayerOutcome, LayerStatus};

/// Result type for alignment operations.
pub type Result<T> = std::result::Result<T, AlignError>;
