//! # rastersum-grid
//!
//! GeoTIFF raster metadata reader and windowed raster I/O engine.
//!
//! This crate provides the raster primitives the rest of the workspace is
//! built on:
//! - [`RasterLayer`]: CRS, geotransform, dimensions and no-data of band 1
//! - [`Window`]: rectangular pixel blocks, and tiling a grid into them
//! - [`RasterEngine`] / [`RasterSink`]: the seam through which rasters are
//!   read, created and warped
//! - [`GeoTiffEngine`]: the bundled single-band Float32 GeoTIFF engine
//!
//! ## Example
//!
//! ```no_run
//! use rastersum_grid::{GeoTiffEngine, RasterEngine, Window};
//!
//! let engine = GeoTiffEngine::new();
//! let layer = engine.open("landcover.tif".as_ref())?;
//! println!("{}x{} in {}", layer.width, layer.height, layer.crs);
//!
//! for window in Window::tiles(layer.width, layer.height, 256) {
//!     let samples = engine.read_window(&layer.path, window)?;
//!     let valid = samples.iter().filter(|v| !layer.is_nodata(**v)).count();
//!     println!("{:?}: {} valid", window, valid);
//! }
//! # Ok::<(), rastersum_grid::GridError>(())
//! ```

mod engine;
mod error;
mod geo;
mod geotiff;
mod layer;

pub use engine::{
    write_raster, BandStatistics, RasterEngine, RasterSink, RasterSpec, StatsAccumulator,
    WarpRequest,
};
pub use error::GridError;
pub use geo::{Bounds, Crs, GeoTransform, Window};
pub use geotiff::GeoTiffEngine;
pub use layer::{read_metadata, RasterLayer, DEFAULT_NODATA};

/// Result type for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;
