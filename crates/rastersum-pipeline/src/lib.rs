//! # rastersum-pipeline
//!
//! Two-stage aggregation jobs with a durable, versioned manifest per job.
//!
//! A job lives under `<root>/<job_id>/` and moves through three states:
//!
//! - `created`: manifest initialized, nothing produced yet.
//! - `stage1_partial`: one or more stage-1 calls have each aligned and
//!   aggregated a batch of layers into one stage-1 output.
//! - `done`: stage 2 aggregated the first seven stage-1 outputs into the
//!   final raster.
//!
//! Stage-1 outputs accumulate across calls and are never appended twice.
//! Layers that fail to align are dropped from their batch together with
//! their multiplier, and the per-layer outcomes are returned to the caller.
//!
//! ```no_run
//! use rastersum_pipeline::{NamedInput, Pipeline, PipelineConfig, Stage1Request, Stage2Request};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let first = pipeline.stage1(Stage1Request {
//!     inputs: vec![
//!         NamedInput::from_path(Path::new("forest.tif"))?,
//!         NamedInput::from_path(Path::new("water.tif"))?,
//!     ],
//!     multipliers: vec![0.2, 0.8],
//!     output_name: "habitat.tif".to_string(),
//!     job_id: None,
//!     user: None,
//! })?;
//! // ... six more stage-1 calls with `job_id: Some(first.job_id.clone())` ...
//! let done = pipeline.stage2(Stage2Request {
//!     job_id: first.job_id,
//!     multipliers: None,
//!     output_name: None,
//! })?;
//! println!("final raster: {}", done.final_path.display());
//! # Ok::<(), rastersum_pipeline::PipelineError>(())
//! ```

mod config;
mod error;
mod job;
mod locks;
mod manifest;
mod pipeline;
mod store;
mod upload;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use job::{JobDirs, JobId};
pub use manifest::{JobStatus, Manifest, Stage1Record, Stage1State, Stage2State, SCHEMA_VERSION};
pub use pipeline::{
    parse_multipliers, CleanupTicket, DeleteOutcome, Pipeline, ResultBounds, Stage1Request, Stage1Response,
    Stage2Request, Stage2Response, REQUIRED_STAGE1_OUTPUTS,
};
pub use store::ManifestStore;
pub use upload::{sanitize_filename, NamedInput, UploadStore, DEFAULT_CHUNK_SIZE};

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
