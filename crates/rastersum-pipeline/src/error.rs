//! Error types for the pipeline.

use rastersum_aggregate::AggregateError;
use rastersum_align::AlignError;
use rastersum_grid::GridError;
use thiserror::Error;

/// Errors that can occur while running or managing jobs.
#[derive(Debug, Error)]
pub enum PipelineError {
    // Validation: rejected before any state is touched.
    /// A multiplier list could not be parsed or holds a non-finite value.
    #[error("Invalid multipliers: {0}")]
    InvalidMultipliers(String),

    /// Inputs and multipliers differ in length.
    #[error("{inputs} inputs but {multipliers} multipliers")]
    MultiplierCountMismatch { inputs: usize, multipliers: usize },

    /// A stage-1 request with no input layers.
    #[error("At least one input layer is required")]
    NoInputs,

    /// A job id that is empty, too long, or not path-safe.
    #[error("Invalid job id {0:?}: use 1-64 ASCII letters, digits, '-' or '_'")]
    InvalidJobId(String),

    /// Stage 2 was requested before enough stage-1 outputs exist.
    #[error("Stage 1 incomplete: {required} outputs required, {found} available")]
    InsufficientStage1Outputs { required: usize, found: usize },

    /// A configuration value no job could run with.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Lookup.
    /// No manifest exists for the job.
    #[error("Job {0} not found")]
    JobNotFound(String),

    /// The job exists but has no final raster yet.
    #[error("Final result for job {0} is not available")]
    ResultUnavailable(String),

    // Concurrency.
    /// The manifest revision on disk moved since it was loaded.
    #[error("Manifest of job {job_id} was modified concurrently (expected revision {expected}, found {found})")]
    ManifestConflict { job_id: String, expected: u64, found: u64 },

    /// A manifest written with a schema version this build cannot read.
    #[error("Manifest schema version {found} is not supported (expected {supported} or an unversioned manifest)")]
    UnsupportedSchema { found: u64, supported: u32 },

    // Resources.
    /// Every layer in a batch was dropped during alignment.
    #[error("No usable layers left after alignment ({dropped} dropped)")]
    NoUsableLayers { dropped: usize },

    /// Alignment could not start, e.g. the reference layer is unreadable.
    #[error("Alignment error: {0}")]
    AlignError(#[from] AlignError),

    /// The aggregation engine rejected its inputs or failed to write.
    #[error("Aggregation error: {0}")]
    AggregateError(#[from] AggregateError),

    /// Reading raster metadata or pixels failed.
    #[error("Raster error: {0}")]
    GridError(#[from] GridError),

    /// Filesystem failure under the job root.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A manifest could not be parsed or serialized.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A configuration file could not be parsed.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Whether the error is a rejected request rather than a processing failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidMultipliers(_)
                | PipelineError::MultiplierCountMismatch { .. }
                | PipelineError::NoInputs
                | PipelineError::InvalidJobId(_)
                | PipelineError::InsufficientStage1Outputs { .. }
        )
    }

    /// Whether the error means the job or its result does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::JobNotFound(_) | PipelineError::ResultUnavailable(_)
        )
    }
}
