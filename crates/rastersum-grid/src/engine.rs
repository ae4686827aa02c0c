//! Raster I/O and warp engine contract.
//!
//! The alignment and aggregation components never touch a file format
//! directly; they go through [`RasterEngine`]. [`crate::GeoTiffEngine`] is the
//! bundled implementation.

use crate::geo::{Bounds, Crs, GeoTransform, Window};
use crate::layer::RasterLayer;
use crate::Result;
use std::path::{Path, PathBuf};

/// Description of a raster grid to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSpec {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel-to-georeferenced transform.
    pub geotransform: GeoTransform,
    /// Coordinate reference system.
    pub crs: Crs,
    /// No-data value written to the artifact, if any.
    pub nodata: Option<f32>,
}

impl RasterSpec {
    /// Spec describing the same grid as an existing layer.
    pub fn like(layer: &RasterLayer) -> Self {
        Self {
            width: layer.width,
            height: layer.height,
            geotransform: layer.geotransform,
            crs: layer.crs.clone(),
            nodata: layer.declared_nodata,
        }
    }

    /// Override the no-data value.
    pub fn with_nodata(mut self, nodata: Option<f32>) -> Self {
        self.nodata = nodata;
        self
    }
}

/// Options for a warp (reproject and/or resample) request.
///
/// Resampling is always nearest-neighbour so that categorical class values
/// survive unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarpRequest {
    /// Target CRS; `None` keeps the source CRS.
    pub target_crs: Option<Crs>,
    /// Target width in pixels; `None` lets the engine decide.
    pub width: Option<u32>,
    /// Target height in pixels; `None` lets the engine decide.
    pub height: Option<u32>,
    /// Target extent; `None` keeps the source extent.
    pub output_bounds: Option<Bounds>,
    /// No-data value for the destination.
    pub dst_nodata: Option<f32>,
}

impl WarpRequest {
    /// Request a reprojection into `crs`.
    pub fn reproject(crs: Crs) -> Self {
        Self {
            target_crs: Some(crs),
            ..Self::default()
        }
    }

    /// Request a resample onto an exact `width` x `height` grid over `bounds`.
    pub fn resize(width: u32, height: u32, bounds: Bounds) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            output_bounds: Some(bounds),
            ..Self::default()
        }
    }

    /// Set the destination no-data value.
    pub fn with_nodata(mut self, nodata: Option<f32>) -> Self {
        self.dst_nodata = nodata;
        self
    }
}

/// Summary statistics of a written band, computed over valid pixels only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BandStatistics {
    /// Smallest valid value.
    pub min: f64,
    /// Largest valid value.
    pub max: f64,
    /// Mean of valid values.
    pub mean: f64,
    /// Population standard deviation of valid values.
    pub std_dev: f64,
    /// Number of valid (non no-data, finite) pixels.
    pub valid_count: u64,
    /// Total number of pixels in the band.
    pub total_count: u64,
}

impl BandStatistics {
    /// Percentage of valid pixels.
    pub fn valid_percent(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.valid_count as f64 * 100.0 / self.total_count as f64
        }
    }
}

/// Streaming accumulator for [`BandStatistics`].
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
    valid: u64,
    total: u64,
}

impl StatsAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ..Self::default()
        }
    }

    /// Fold a run of samples, skipping `nodata` and non-finite values.
    pub fn push_all(&mut self, samples: &[f32], nodata: Option<f32>) {
        for &v in samples {
            self.total += 1;
            if !v.is_finite() || nodata.is_some_and(|nd| v == nd) {
                continue;
            }
            let v = v as f64;
            self.min = self.min.min(v);
            self.max = self.max.max(v);
            self.sum += v;
            self.sum_sq += v * v;
            self.valid += 1;
        }
    }

    /// Produce the final statistics.
    pub fn finish(&self) -> BandStatistics {
        if self.valid == 0 {
            return BandStatistics {
                total_count: self.total,
                ..BandStatistics::default()
            };
        }
        let n = self.valid as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        BandStatistics {
            min: self.min,
            max: self.max,
            mean,
            std_dev: variance.sqrt(),
            valid_count: self.valid,
            total_count: self.total,
        }
    }
}

/// Writable handle for a raster being created.
///
/// Tiles may be written in any order. Nothing is visible at the destination
/// path until [`RasterSink::finish`] succeeds.
pub trait RasterSink: Send {
    /// The grid this sink writes.
    fn spec(&self) -> &RasterSpec;

    /// Write a row-major block of samples at `window`.
    fn write_tile(&mut self, window: Window, data: &[f32]) -> Result<()>;

    /// Compute band statistics and materialize the artifact.
    fn finish(self: Box<Self>) -> Result<BandStatistics>;

    /// Discard everything written so far, leaving nothing on disk.
    fn abort(self: Box<Self>);
}

/// Raster I/O and warp engine.
pub trait RasterEngine: Send + Sync {
    /// Open an artifact and read its metadata.
    fn open(&self, path: &Path) -> Result<RasterLayer>;

    /// Read band 1 samples inside `window`, row-major.
    fn read_window(&self, path: &Path, window: Window) -> Result<Vec<f32>>;

    /// Create a new single-band Float32 raster.
    fn create(&self, path: &Path, spec: &RasterSpec) -> Result<Box<dyn RasterSink>>;

    /// Warp `src` into a new artifact at `dst`, returning the written path.
    fn warp(&self, src: &Path, request: &WarpRequest, dst: &Path) -> Result<PathBuf>;
}

/// Write a whole grid in one call.
pub fn write_raster(
    engine: &dyn RasterEngine,
    path: &Path,
    spec: &RasterSpec,
    data: &[f32],
) -> Result<BandStatistics> {
    let mut sink = engine.create(path, spec)?;
    if let Err(e) = sink.write_tile(Window::full(spec.width, spec.height), data) {
        sink.abort();
        return Err(e);
    }
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stats_skip_nodata_and_nan() {
        let mut acc = StatsAccumulator::new();
        acc.push_all(&[1.0, 2.0, 255.0, f32::NAN, 3.0], Some(255.0));
        let stats = acc.finish();

        assert_eq!(stats.valid_count, 3);
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert_relative_eq!(stats.mean, 2.0);
        assert_relative_eq!(stats.std_dev, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(stats.valid_percent(), 60.0);
    }

    #[test]
    fn test_stats_all_invalid() {
        let mut acc = StatsAccumulator::new();
        acc.push_all(&[255.0, 255.0], Some(255.0));
        let stats = acc.finish();
        assert_eq!(stats.valid_count, 0);
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.valid_percent(), 0.0);
    }

    #[test]
    fn test_warp_request_builders() {
        let bounds = Bounds { min_x: 0.0, min_y: 0.0, max_x: 4.0, max_y: 4.0 };
        let req = WarpRequest::resize(4, 4, bounds).with_nodata(Some(255.0));
        assert_eq!(req.width, Some(4));
        assert_eq!(req.output_bounds, Some(bounds));
        assert_eq!(req.dst_nodata, Some(255.0));
        assert!(req.target_crs.is_none());

        let req = WarpRequest::reproject(Crs::from_epsg(4326));
        assert_eq!(req.target_crs.and_then(|c| c.epsg()), Some(4326));
    }
}
