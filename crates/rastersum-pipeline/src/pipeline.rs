//! The two-stage job orchestrator.

use crate::config::PipelineConfig;
use crate::job::{JobDirs, JobId};
use crate::locks::JobLocks;
use crate::manifest::Manifest;
use crate::store::ManifestStore;
use crate::upload::{sanitize_filename, NamedInput, UploadStore};
use crate::{PipelineError, Result};
use chrono::Utc;
use rastersum_aggregate::{aggregate, AggregationSummary};
use rastersum_align::{AlignmentCoordinator, AlignmentReport};
use rastersum_grid::{Bounds, GeoTiffEngine, RasterEngine};
use rastersum_metrics::metric_defs;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stage-1 outputs consumed by stage 2. Fixed by policy, not configurable.
pub const REQUIRED_STAGE1_OUTPUTS: usize = 7;

// ============================================================================
// Requests and responses
// ============================================================================

/// A stage-1 call: one batch of layers aggregated into one stage-1 output.
#[derive(Debug)]
pub struct Stage1Request {
    /// Input layers; the first is the alignment reference.
    pub inputs: Vec<NamedInput>,
    /// One multiplier per input.
    pub multipliers: Vec<f64>,
    /// File name of the output within the job's stage-1 output directory.
    pub output_name: String,
    /// Existing job to extend; a new id is generated when absent.
    pub job_id: Option<JobId>,
    /// Recorded on the manifest of a new job.
    pub user: Option<String>,
}

/// Result of a stage-1 call.
#[derive(Debug, Clone, Serialize)]
pub struct Stage1Response {
    pub job_id: JobId,
    /// Output written by this call.
    pub added: PathBuf,
    /// Every stage-1 output of the job, in manifest order.
    pub stage1_outputs: Vec<PathBuf>,
    /// Per-layer alignment outcomes of this batch.
    pub alignment: AlignmentReport,
    pub summary: AggregationSummary,
}

/// A stage-2 call over the accumulated stage-1 outputs.
#[derive(Debug, Clone)]
pub struct Stage2Request {
    pub job_id: JobId,
    /// One multiplier per consumed stage-1 output; all ones when absent.
    pub multipliers: Option<Vec<f64>>,
    /// File name of the final output; the configured default when absent.
    pub output_name: Option<String>,
}

/// Result of a stage-2 call.
#[derive(Debug, Clone, Serialize)]
pub struct Stage2Response {
    pub job_id: JobId,
    pub final_path: PathBuf,
    pub alignment: AlignmentReport,
    pub summary: AggregationSummary,
}

/// What a delete found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The job existed and was removed.
    Removed,
    /// There was nothing to remove.
    NotFound,
}

/// Native-CRS extent of a job's final raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultBounds {
    pub job_id: JobId,
    pub bounds: Bounds,
    /// Human-readable CRS description.
    pub crs: String,
    /// EPSG code, when the CRS has one.
    pub epsg: Option<u16>,
}

/// Handle on a cleanup started by [`Pipeline::close`].
///
/// Dropping the ticket lets the cleanup finish on its own.
#[derive(Debug)]
pub struct CleanupTicket {
    job_id: JobId,
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Finished(Result<DeleteOutcome>),
    Running(JoinHandle<Result<DeleteOutcome>>),
}

impl CleanupTicket {
    /// The job being cleaned up.
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether the cleanup already ran to completion.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            TicketState::Finished(_) => true,
            TicketState::Running(handle) => handle.is_finished(),
        }
    }

    /// Block until the cleanup is done.
    pub fn wait(self) -> Result<DeleteOutcome> {
        match self.state {
            TicketState::Finished(outcome) => outcome,
            TicketState::Running(handle) => handle
                .join()
                .map_err(|_| PipelineError::IoError(std::io::Error::other("cleanup thread panicked")))?,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs jobs under a root directory, one subdirectory per job.
///
/// Mutating calls (stage 1, stage 2, delete) on the same job id are
/// serialized in-process; the manifest revision catches writers from other
/// processes. Read-only calls take no lock and may see a job disappear while
/// it is being deleted.
pub struct Pipeline {
    config: PipelineConfig,
    engine: Arc<dyn RasterEngine>,
    coordinator: AlignmentCoordinator,
    store: ManifestStore,
    uploads: UploadStore,
    locks: Arc<JobLocks>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline on the bundled GeoTIFF engine.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(GeoTiffEngine::new()))
    }

    /// Create a pipeline on a custom raster engine.
    ///
    /// The root directory is created if needed and resolved to an absolute
    /// path, so every path the pipeline reports is absolute.
    pub fn with_engine(mut config: PipelineConfig, engine: Arc<dyn RasterEngine>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root)?;
        config.root = fs::canonicalize(&config.root)?;

        let coordinator = AlignmentCoordinator::new(Arc::clone(&engine)).with_timeout(config.align_timeout());
        info!(root = %config.root.display(), "Pipeline ready");
        Ok(Self {
            store: ManifestStore::new(&config.root),
            uploads: UploadStore::new(),
            locks: Arc::new(JobLocks::default()),
            coordinator,
            engine,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Directory layout of `job`.
    pub fn job_dirs(&self, job: &JobId) -> JobDirs {
        JobDirs::new(&self.config.root, job)
    }

    /// Ids of all jobs with a manifest.
    pub fn list_jobs(&self) -> Result<Vec<JobId>> {
        self.store.list_jobs()
    }

    // ------------------------------------------------------------------------
    // Stage 1
    // ------------------------------------------------------------------------

    /// Save a batch of inputs, align and aggregate them into one new stage-1
    /// output, and append it to the job's manifest.
    pub fn stage1(&self, request: Stage1Request) -> Result<Stage1Response> {
        let result = self.run_stage1(request);
        let outcome = call_outcome(&result);
        metrics::counter!(metric_defs::STAGE1_CALLS.name, "outcome" => outcome).increment(1);
        result
    }

    fn run_stage1(&self, request: Stage1Request) -> Result<Stage1Response> {
        let Stage1Request {
            inputs,
            multipliers,
            output_name,
            job_id,
            user,
        } = request;
        if inputs.is_empty() {
            return Err(PipelineError::NoInputs);
        }
        if inputs.len() != multipliers.len() {
            return Err(PipelineError::MultiplierCountMismatch {
                inputs: inputs.len(),
                multipliers: multipliers.len(),
            });
        }
        check_finite(&multipliers)?;

        let job_id = job_id.unwrap_or_else(JobId::generate);
        let _guard = self.locks.acquire(&job_id);
        let dirs = self.job_dirs(&job_id);

        let existing = self.store.load(&job_id)?;
        let is_new = existing.is_none();
        let mut manifest = existing.unwrap_or_else(|| Manifest::new(job_id.clone(), user));

        let result = self.stage1_batch(&dirs, inputs, &multipliers, &output_name);
        let (output, alignment, summary) = match result {
            Ok(done) => done,
            Err(e) => {
                if is_new {
                    // Nothing was recorded for this job; leave no directory behind.
                    if let Err(cleanup) = dirs.remove() {
                        warn!(job_id = %job_id, error = %cleanup, "Failed to remove job directory");
                    }
                }
                return Err(e);
            }
        };

        let dropped = alignment.dropped().len();
        manifest.record_stage1(&output, alignment.len(), dropped);
        if is_new {
            self.store.create(&manifest)?;
        } else {
            self.store.save(&mut manifest)?;
        }

        info!(
            job_id = %job_id,
            output = %output.display(),
            outputs = manifest.stage1.outputs.len(),
            dropped,
            "Stage 1 complete"
        );
        Ok(Stage1Response {
            job_id,
            added: output,
            stage1_outputs: manifest.stage1.outputs,
            alignment,
            summary,
        })
    }

    fn stage1_batch(
        &self,
        dirs: &JobDirs,
        inputs: Vec<NamedInput>,
        multipliers: &[f64],
        output_name: &str,
    ) -> Result<(PathBuf, AlignmentReport, AggregationSummary)> {
        dirs.create()?;
        let saved = self.uploads.save_inputs(&dirs.stage1_inputs, inputs)?;
        let output = dirs.stage1_outputs.join(sanitize_filename(output_name));
        let (alignment, summary) = self.run_batch(&saved, multipliers, &dirs.stage1_aligned, &output)?;
        Ok((output, alignment, summary))
    }

    // ------------------------------------------------------------------------
    // Stage 2
    // ------------------------------------------------------------------------

    /// Aggregate the first [`REQUIRED_STAGE1_OUTPUTS`] stage-1 outputs into the
    /// job's final raster and mark the job done.
    pub fn stage2(&self, request: Stage2Request) -> Result<Stage2Response> {
        let result = self.run_stage2(request);
        let outcome = call_outcome(&result);
        metrics::counter!(metric_defs::STAGE2_CALLS.name, "outcome" => outcome).increment(1);
        result
    }

    fn run_stage2(&self, request: Stage2Request) -> Result<Stage2Response> {
        let required = REQUIRED_STAGE1_OUTPUTS;
        let job_id = request.job_id;
        let multipliers = match request.multipliers {
            Some(multipliers) => {
                if multipliers.len() != required {
                    return Err(PipelineError::MultiplierCountMismatch {
                        inputs: required,
                        multipliers: multipliers.len(),
                    });
                }
                check_finite(&multipliers)?;
                multipliers
            }
            None => vec![1.0; required],
        };
        let name = request
            .output_name
            .as_deref()
            .map(sanitize_filename)
            .unwrap_or_else(|| self.config.final_output_name.clone());

        let _guard = self.locks.acquire(&job_id);
        let mut manifest = self
            .store
            .load(&job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        let found = manifest.stage1.outputs.len();
        if found < required {
            return Err(PipelineError::InsufficientStage1Outputs { required, found });
        }

        let dirs = self.job_dirs(&job_id);
        dirs.create()?;
        let inputs: Vec<PathBuf> = manifest.stage1.outputs[..required].to_vec();
        let final_path = dirs.final_dir.join(name);
        let (alignment, summary) = self.run_batch(&inputs, &multipliers, &dirs.stage2_aligned, &final_path)?;

        manifest.complete_stage2(&final_path);
        self.store.save(&mut manifest)?;

        info!(job_id = %job_id, output = %final_path.display(), "Stage 2 complete");
        Ok(Stage2Response {
            job_id,
            final_path,
            alignment,
            summary,
        })
    }

    /// Align `inputs`, then aggregate the layers that survived, each with its
    /// own multiplier.
    fn run_batch(
        &self,
        inputs: &[PathBuf],
        multipliers: &[f64],
        scratch: &Path,
        output: &Path,
    ) -> Result<(AlignmentReport, AggregationSummary)> {
        let alignment = self.coordinator.align(inputs, scratch)?;
        let kept = alignment.aligned_indices();
        if kept.is_empty() {
            return Err(PipelineError::NoUsableLayers {
                dropped: alignment.dropped().len(),
            });
        }
        if !alignment.is_complete() {
            warn!(
                output = %output.display(),
                dropped = ?alignment.dropped(),
                "Aggregating without dropped layers"
            );
        }

        let layers = alignment.aligned_paths();
        let weights: Vec<f64> = kept.iter().map(|&index| multipliers[index]).collect();
        let summary = aggregate(self.engine.as_ref(), &layers, &weights, output, &self.config.aggregation)?;
        Ok((alignment, summary))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// The job's manifest.
    pub fn status(&self, job: &JobId) -> Result<Manifest> {
        self.store
            .load(job)?
            .ok_or_else(|| PipelineError::JobNotFound(job.to_string()))
    }

    /// Path of the final raster, once stage 2 has produced it.
    pub fn result_path(&self, job: &JobId) -> Result<PathBuf> {
        let manifest = self.status(job)?;
        match manifest.final_output() {
            Some(path) if path.is_file() => Ok(path.to_path_buf()),
            _ => Err(PipelineError::ResultUnavailable(job.to_string())),
        }
    }

    /// Bytes of the final raster.
    pub fn read_result(&self, job: &JobId) -> Result<Vec<u8>> {
        let path = self.result_path(job)?;
        Ok(fs::read(path)?)
    }

    /// Extent of the final raster in its own CRS.
    pub fn result_bounds(&self, job: &JobId) -> Result<ResultBounds> {
        let path = self.result_path(job)?;
        let layer = self.engine.open(&path)?;
        Ok(ResultBounds {
            job_id: job.clone(),
            bounds: layer.bounds(),
            crs: layer.crs.to_string(),
            epsg: layer.crs.epsg(),
        })
    }

    // ------------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------------

    /// Remove the job and everything under its directory. Deleting a job
    /// that does not exist succeeds with [`DeleteOutcome::NotFound`].
    pub fn delete(&self, job: &JobId) -> Result<DeleteOutcome> {
        remove_job(&self.locks, &self.job_dirs(job), job, "delete")
    }

    /// Start removing the job on a background thread and return at once.
    pub fn close(&self, job: &JobId) -> CleanupTicket {
        let dirs = self.job_dirs(job);
        if !dirs.exists() {
            debug!(job_id = %job, "Close requested for unknown job");
            return CleanupTicket {
                job_id: job.clone(),
                state: TicketState::Finished(Ok(DeleteOutcome::NotFound)),
            };
        }

        let locks = Arc::clone(&self.locks);
        let thread_job = job.clone();
        let thread_dirs = dirs.clone();
        let spawned = thread::Builder::new()
            .name(format!("rastersum-cleanup-{job}"))
            .spawn(move || remove_job(&locks, &thread_dirs, &thread_job, "close"));

        let state = match spawned {
            Ok(handle) => TicketState::Running(handle),
            Err(e) => {
                warn!(job_id = %job, error = %e, "Could not spawn cleanup thread, cleaning up inline");
                TicketState::Finished(remove_job(&self.locks, &dirs, job, "close"))
            }
        };
        CleanupTicket {
            job_id: job.clone(),
            state,
        }
    }

    /// Remove every job whose manifest was last updated more than `max_age`
    /// ago. Returns the removed ids.
    pub fn purge_older_than(&self, max_age: Duration) -> Result<Vec<JobId>> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| PipelineError::ConfigError(format!("purge age out of range: {e}")))?;
        let now = Utc::now();

        let mut removed = Vec::new();
        for job in self.store.list_jobs()? {
            let manifest = match self.store.load(&job) {
                Ok(Some(manifest)) => manifest,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %job, error = %e, "Skipping job with unreadable manifest");
                    continue;
                }
            };
            if now.signed_duration_since(manifest.updated_at) <= max_age {
                continue;
            }
            if remove_job(&self.locks, &self.job_dirs(&job), &job, "purge")? == DeleteOutcome::Removed {
                removed.push(job);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Purged expired jobs");
        }
        Ok(removed)
    }
}

fn remove_job(locks: &Arc<JobLocks>, dirs: &JobDirs, job: &JobId, trigger: &'static str) -> Result<DeleteOutcome> {
    let _guard = locks.acquire(job);
    if dirs.remove()? {
        metrics::counter!(metric_defs::JOBS_DELETED.name, "trigger" => trigger).increment(1);
        info!(job_id = %job, trigger, "Job removed");
        Ok(DeleteOutcome::Removed)
    } else {
        debug!(job_id = %job, trigger, "Job already absent");
        Ok(DeleteOutcome::NotFound)
    }
}

fn check_finite(multipliers: &[f64]) -> Result<()> {
    match multipliers.iter().position(|m| !m.is_finite()) {
        Some(index) => Err(PipelineError::InvalidMultipliers(format!(
            "multiplier {index} is {}",
            multipliers[index]
        ))),
        None => Ok(()),
    }
}

fn call_outcome<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_validation() || e.is_not_found() => "rejected",
        Err(_) => "failed",
    }
}

/// Parse a comma-separated multiplier list such as `"0.2, 0.8,-1"`.
pub fn parse_multipliers(text: &str) -> Result<Vec<f64>> {
    if text.trim().is_empty() {
        return Err(PipelineError::InvalidMultipliers("no values given".to_string()));
    }
    let values = text
        .split(',')
        .map(str::trim)
        .map(|part| {
            part.parse::<f64>()
                .map_err(|_| PipelineError::InvalidMultipliers(format!("{part:?} is not a number")))
        })
        .collect::<Result<Vec<f64>>>()?;
    check_finite(&values)?;
    Ok(values)
}
