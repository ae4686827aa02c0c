//! Pipeline configuration.

use crate::{PipelineError, Result};
use rastersum_aggregate::AggregationPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration of a [`Pipeline`](crate::Pipeline).
///
/// Every field has a default, so a YAML file only needs the keys it changes:
///
/// ```yaml
/// root: /data/pipelines
/// align_timeout_secs: 120
/// aggregation:
///   tile_size: 512
///   valid_range: { min: 1.0, max: 7.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding one subdirectory per job.
    pub root: PathBuf,
    /// File name of the stage-2 output when the caller names none.
    pub final_output_name: String,
    /// Per-layer warp timeout in seconds.
    pub align_timeout_secs: u64,
    /// Tiling, validity and parallelism of both aggregation stages.
    pub aggregation: AggregationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("pipelines"),
            final_output_name: "final_result.tif".to_string(),
            align_timeout_secs: 300,
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.tile_size == 0 {
            return Err(PipelineError::ConfigError("aggregation.tile_size must be positive".to_string()));
        }
        let range = &self.aggregation.valid_range;
        if !(range.min.is_finite() && range.max.is_finite() && range.min <= range.max) {
            return Err(PipelineError::ConfigError(format!(
                "aggregation.valid_range [{}, {}] is empty or not finite",
                range.min, range.max
            )));
        }
        if self.align_timeout_secs == 0 {
            return Err(PipelineError::ConfigError("align_timeout_secs must be positive".to_string()));
        }
        let name = &self.final_output_name;
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(PipelineError::ConfigError(format!(
                "final_output_name {name:?} must be a plain file name"
            )));
        }
        Ok(())
    }

    /// Warp timeout as a [`Duration`].
    pub fn align_timeout(&self) -> Duration {
        Duration::from_secs(self.align_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rastersum_aggregate::ValidRange;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.final_output_name, "final_result.tif");
        assert_eq!(config.align_timeout(), Duration::from_secs(300));
        assert_eq!(config.aggregation, AggregationPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = PipelineConfig::from_yaml_str(
            "root: /data/jobs\naggregation:\n  tile_size: 64\n  valid_range: { min: 1.0, max: 7.0 }\n",
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/data/jobs"));
        assert_eq!(config.aggregation.tile_size, 64);
        assert_eq!(config.aggregation.valid_range, ValidRange { min: 1.0, max: 7.0 });
        assert!(config.aggregation.parallel);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = PipelineConfig {
            align_timeout_secs: 30,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(PipelineConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_invalid_config() {
        for yaml in [
            "align_timeout_secs: 0",
            "final_output_name: ../x.tif",
            "aggregation:\n  tile_size: 0",
            "aggregation:\n  valid_range: { min: 5.0, max: 1.0 }",
        ] {
            assert!(
                matches!(PipelineConfig::from_yaml_str(yaml), Err(PipelineError::ConfigError(_))),
                "{yaml}"
            );
        }
        assert!(matches!(
            PipelineConfig::from_yaml_str("root: [1, 2"),
            Err(PipelineError::YamlError(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        // The stage-2 layer count is fixed; a config file cannot change it.
        for yaml in ["required_stage1_outputs: 1\n", "tile_sise: 64\n"] {
            assert!(
                matches!(PipelineConfig::from_yaml_str(yaml), Err(PipelineError::YamlError(_))),
                "{yaml}"
            );
        }
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "final_output_name: combined.tif\n").unwrap();
        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.final_output_name, "combined.tif");
    }
}
