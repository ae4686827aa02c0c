//! Tiled weighted-sum aggregation.

use crate::kernel::TileAccumulator;
use crate::policy::AggregationPolicy;
use crate::{AggregateError, Result};
use parking_lot::Mutex;
use rastersum_grid::{BandStatistics, RasterEngine, RasterLayer, RasterSink, RasterSpec, Window};
use rastersum_metrics::metric_defs;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What an aggregation wrote.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregationSummary {
    /// Path of the output raster.
    pub output: PathBuf,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Number of layers summed.
    pub layers: usize,
    /// Number of tiles processed.
    pub tiles: usize,
    /// No-data value of the output.
    pub nodata: f32,
    /// Statistics of the output band.
    pub statistics: BandStatistics,
}

/// Compute `Σ multipliers[i] × layers[i]` into a new raster at `output`.
///
/// The output grid, CRS and no-data value come from `layers[0]`; every other
/// layer must be congruent with it. A pixel is no-data in the output when it
/// is invalid in any layer. On failure nothing is left at `output`.
pub fn aggregate<P: AsRef<Path>>(
    engine: &dyn RasterEngine,
    layers: &[P],
    multipliers: &[f64],
    output: &Path,
    policy: &AggregationPolicy,
) -> Result<AggregationSummary> {
    policy.validate()?;
    let weights = validate_multipliers(layers.len(), multipliers)?;
    let opened = open_layers(engine, layers)?;
    let reference = &opened[0];

    let nodata = reference.declared_nodata.unwrap_or(policy.default_nodata);
    let spec = RasterSpec::like(reference).with_nodata(Some(nodata));
    let tiles = Window::tiles(spec.width, spec.height, policy.tile_size);

    debug!(
        output = %output.display(),
        layers = opened.len(),
        width = spec.width,
        height = spec.height,
        tiles = tiles.len(),
        parallel = policy.parallel,
        "Starting aggregation"
    );

    let started = Instant::now();
    let sink = engine
        .create(output, &spec)
        .map_err(|source| AggregateError::OutputUnwritable {
            path: output.to_path_buf(),
            source,
        })?;
    let sink = Mutex::new(sink);

    let process = |tile: &Window| -> Result<()> {
        let data = compute_tile(engine, &opened, &weights, policy, *tile, nodata)?;
        sink.lock().write_tile(*tile, &data)?;
        Ok(())
    };
    let written = if policy.parallel {
        tiles.par_iter().try_for_each(process)
    } else {
        tiles.iter().try_for_each(process)
    };

    let sink: Box<dyn RasterSink> = sink.into_inner();
    if let Err(e) = written {
        warn!(output = %output.display(), error = %e, "Aggregation failed, discarding output");
        sink.abort();
        return Err(e);
    }
    let statistics = sink.finish().map_err(|source| AggregateError::OutputUnwritable {
        path: output.to_path_buf(),
        source,
    })?;

    let elapsed = started.elapsed();
    metrics::counter!(metric_defs::TILES_WRITTEN.name).increment(tiles.len() as u64);
    metrics::histogram!(metric_defs::AGGREGATION_DURATION.name).record(elapsed.as_secs_f64() * 1000.0);
    info!(
        output = %output.display(),
        layers = opened.len(),
        tiles = tiles.len(),
        valid_percent = statistics.valid_percent(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Aggregation complete"
    );

    Ok(AggregationSummary {
        output: output.to_path_buf(),
        width: spec.width,
        height: spec.height,
        layers: opened.len(),
        tiles: tiles.len(),
        nodata,
        statistics,
    })
}

fn validate_multipliers(layers: usize, multipliers: &[f64]) -> Result<Vec<f32>> {
    if layers == 0 {
        return Err(AggregateError::NoInputs);
    }
    if layers != multipliers.len() {
        return Err(AggregateError::MultiplierCountMismatch {
            layers,
            multipliers: multipliers.len(),
        });
    }
    multipliers
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            let weight = value as f32;
            if weight.is_finite() {
                Ok(weight)
            } else {
                Err(AggregateError::InvalidMultiplier { index, value })
            }
        })
        .collect()
}

/// Open every layer and check it against the first.
fn open_layers<P: AsRef<Path>>(engine: &dyn RasterEngine, layers: &[P]) -> Result<Vec<RasterLayer>> {
    let mut opened: Vec<RasterLayer> = Vec::with_capacity(layers.len());
    for (index, path) in layers.iter().enumerate() {
        let path = path.as_ref();
        let layer = engine
            .open(path)
            .map_err(|source| AggregateError::LayerUnreadable {
                index,
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(reference) = opened.first() {
            if let Some(reason) = mismatch(reference, &layer) {
                return Err(AggregateError::DimensionMismatch {
                    index,
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }
        opened.push(layer);
    }
    Ok(opened)
}

fn mismatch(reference: &RasterLayer, layer: &RasterLayer) -> Option<String> {
    if layer.dimensions() != reference.dimensions() {
        Some(format!(
            "{}x{} pixels, expected {}x{}",
            layer.width, layer.height, reference.width, reference.height
        ))
    } else if layer.crs != reference.crs {
        Some(format!("CRS {}, expected {}", layer.crs, reference.crs))
    } else if !layer.geotransform.approx_eq(&reference.geotransform) {
        Some(format!(
            "geotransform {:?}, expected {:?}",
            layer.geotransform.0, reference.geotransform.0
        ))
    } else {
        None
    }
}

fn compute_tile(
    engine: &dyn RasterEngine,
    layers: &[RasterLayer],
    weights: &[f32],
    policy: &AggregationPolicy,
    tile: Window,
    nodata: f32,
) -> Result<Vec<f32>> {
    let mut acc = TileAccumulator::new(tile.len());
    for (layer, &weight) in layers.iter().zip(weights) {
        let samples = engine.read_window(&layer.path, tile)?;
        acc.fold(layer, &samples, weight, &policy.valid_range);
    }
    Ok(acc.finish(nodata))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_multipliers() {
        assert!(matches!(validate_multipliers(0, &[]), Err(AggregateError::NoInputs)));
        assert!(matches!(
            validate_multipliers(2, &[1.0]),
            Err(AggregateError::MultiplierCountMismatch { layers: 2, multipliers: 1 })
        ));
        assert!(matches!(
            validate_multipliers(2, &[1.0, f64::NAN]),
            Err(AggregateError::InvalidMultiplier { index: 1, .. })
        ));
        // Finite in f64 but not representable in f32.
        assert!(matches!(
            validate_multipliers(1, &[1e300]),
            Err(AggregateError::InvalidMultiplier { index: 0, .. })
        ));
        assert_eq!(validate_multipliers(2, &[0.5, -2.0]).unwrap(), vec![0.5, -2.0]);
    }
}
