//! Per-tile weighted-sum kernel.

use crate::policy::ValidRange;
use rastersum_grid::RasterLayer;

/// Running weighted sum and combined validity of one tile.
///
/// A pixel stays valid only while it is valid in every folded layer. Invalid
/// samples contribute nothing to the sum.
#[derive(Debug, Clone)]
pub(crate) struct TileAccumulator {
    sum: Vec<f32>,
    valid: Vec<bool>,
}

impl TileAccumulator {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            sum: vec![0.0; len],
            valid: vec![true; len],
        }
    }

    /// Fold one layer's samples for this tile.
    pub(crate) fn fold(&mut self, layer: &RasterLayer, samples: &[f32], multiplier: f32, range: &ValidRange) {
        debug_assert_eq!(samples.len(), self.sum.len());
        for ((sum, valid), &value) in self.sum.iter_mut().zip(self.valid.iter_mut()).zip(samples) {
            if range.contains(value) && !layer.is_nodata(value) {
                *sum += value * multiplier;
            } else {
                *valid = false;
            }
        }
    }

    /// Replace invalid pixels with `nodata` and return the tile.
    pub(crate) fn finish(self, nodata: f32) -> Vec<f32> {
        let mut out = self.sum;
        for (value, valid) in out.iter_mut().zip(self.valid) {
            if !valid {
                *value = nodata;
            }
        }
        out
    }
}
