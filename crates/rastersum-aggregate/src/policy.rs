//! Aggregation policy.

use crate::{AggregateError, Result};
use rastersum_grid::DEFAULT_NODATA;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Inclusive numeric domain of valid samples.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidRange {
    /// Smallest valid value.
    pub min: f32,
    /// Largest valid value.
    pub max: f32,
}

impl ValidRange {
    /// Create a range, rejecting non-finite or inverted bounds.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    /// Whether `value` is finite and inside the range.
    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(AggregateError::InvalidPolicy(format!(
                "valid range [{}, {}] is empty or not finite",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for ValidRange {
    fn default() -> Self {
        Self { min: 0.0, max: 7.0 }
    }
}

/// How an aggregation is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AggregationPolicy {
    /// Edge length of the square processing tiles.
    pub tile_size: u32,
    /// Samples outside this range are treated as invalid.
    pub valid_range: ValidRange,
    /// Output no-data used when the first layer declares none.
    pub default_nodata: f32,
    /// Compute tiles on the rayon thread pool.
    pub parallel: bool,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            valid_range: ValidRange::default(),
            default_nodata: DEFAULT_NODATA,
            parallel: true,
        }
    }
}

impl AggregationPolicy {
    /// Set the tile edge length.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Set the valid range.
    pub fn with_valid_range(mut self, valid_range: ValidRange) -> Self {
        self.valid_range = valid_range;
        self
    }

    /// Enable or disable parallel tile processing.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(AggregateError::InvalidPolicy("tile size must be positive".to_string()));
        }
        self.valid_range.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_range_is_inclusive() {
        let range = ValidRange::default();
        assert!(range.contains(0.0));
        assert!(range.contains(7.0));
        assert!(range.contains(3.5));
        assert!(!range.contains(-0.1));
        assert!(!range.contains(7.01));
        assert!(!range.contains(255.0));
        assert!(!range.contains(f32::NAN));
        assert!(!range.contains(f32::INFINITY));
    }

    #[test]
    fn test_range_validation() {
        assert!(ValidRange::new(1.0, 7.0).is_ok());
        assert!(ValidRange::new(3.0, 3.0).is_ok());
        assert!(ValidRange::new(7.0, 1.0).is_err());
        assert!(ValidRange::new(f32::NAN, 1.0).is_err());
    }

    #[test]
    fn test_policy_defaults() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.tile_size, 256);
        assert_eq!(policy.default_nodata, 255.0);
        assert!(policy.validate().is_ok());
        assert!(policy.with_tile_size(0).validate().is_err());
    }
}
