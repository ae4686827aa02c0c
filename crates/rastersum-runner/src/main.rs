//! rastersum - two-stage weighted raster aggregation from the command line.

use clap::{Parser, Subcommand};
use rastersum_pipeline::{
    parse_multipliers, DeleteOutcome, JobId, NamedInput, Pipeline, PipelineConfig, PipelineError, Stage1Request,
    Stage2Request,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI structure
// ============================================================================

#[derive(Parser)]
#[command(name = "rastersum")]
#[command(author, version, about = "Two-stage weighted raster aggregation", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Job root directory (overrides the configuration file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Aggregation tile size in pixels (overrides the configuration file)
    #[arg(long, global = true)]
    tile_size: Option<u32>,

    /// Print responses as pretty JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a batch of layers into one more stage-1 output
    Stage1 {
        /// Input rasters; the first is the alignment reference
        #[arg(short, long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Comma-separated multipliers, one per input (default: all 1)
        #[arg(short, long)]
        multipliers: Option<String>,
        /// Output file name
        #[arg(short, long)]
        output: String,
        /// Existing job to extend
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: Option<JobId>,
        /// User recorded on a new job
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Aggregate the accumulated stage-1 outputs into the final raster
    Stage2 {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
        /// Comma-separated multipliers, one per stage-1 output (default: all 1)
        #[arg(short, long)]
        multipliers: Option<String>,
        /// Final output file name
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show a job's manifest
    Status {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
    },
    /// Copy a job's final raster to a file
    Result {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
        /// Destination file
        #[arg(short, long)]
        dest: PathBuf,
    },
    /// Show the extent of a job's final raster in its own CRS
    Bounds {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
    },
    /// List jobs
    Jobs,
    /// Delete a job and all of its files
    Delete {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
    },
    /// Close a job: clean it up on a background worker
    Close {
        #[arg(short, long, value_parser = parse_job_id)]
        job_id: JobId,
    },
    /// Delete jobs not updated within the given number of hours
    Purge {
        #[arg(long)]
        max_age_hours: u64,
    },
}

fn parse_job_id(s: &str) -> Result<JobId, String> {
    JobId::new(s).map_err(|e| e.to_string())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
enum RunnerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    fn exit_code(&self) -> ExitCode {
        match self {
            RunnerError::Pipeline(e) if e.is_validation() => ExitCode::from(2),
            RunnerError::Pipeline(e) if e.is_not_found() => ExitCode::from(3),
            _ => ExitCode::FAILURE,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    rastersum_metrics::describe_metrics();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, RunnerError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(tile_size) = cli.tile_size {
        config.aggregation.tile_size = tile_size;
    }
    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    let pipeline = Pipeline::new(load_config(&cli)?)?;
    let json = cli.json;

    match cli.command {
        Commands::Stage1 {
            inputs,
            multipliers,
            output,
            job_id,
            user,
        } => {
            let multipliers = match multipliers {
                Some(text) => parse_multipliers(&text)?,
                None => vec![1.0; inputs.len()],
            };
            let inputs = inputs
                .iter()
                .map(|path| NamedInput::from_path(path))
                .collect::<Result<Vec<_>, _>>()?;
            let response = pipeline.stage1(Stage1Request {
                inputs,
                multipliers,
                output_name: output,
                job_id,
                user,
            })?;
            emit(json, &response, || {
                let mut text = format!(
                    "job {}: added {} ({} stage-1 outputs)",
                    response.job_id,
                    response.added.display(),
                    response.stage1_outputs.len()
                );
                let dropped = response.alignment.dropped();
                if !dropped.is_empty() {
                    text.push_str(&format!("\ndropped input layers: {dropped:?}"));
                }
                text
            })
        }
        Commands::Stage2 {
            job_id,
            multipliers,
            output,
        } => {
            let multipliers = multipliers.as_deref().map(parse_multipliers).transpose()?;
            let response = pipeline.stage2(Stage2Request {
                job_id,
                multipliers,
                output_name: output,
            })?;
            emit(json, &response, || {
                format!("job {}: final result {}", response.job_id, response.final_path.display())
            })
        }
        Commands::Status { job_id } => {
            let manifest = pipeline.status(&job_id)?;
            emit(json, &manifest, || {
                format!(
                    "job {}: {:?}, {} stage-1 outputs, revision {}",
                    manifest.job_id,
                    manifest.status,
                    manifest.stage1.outputs.len(),
                    manifest.revision
                )
            })
        }
        Commands::Result { job_id, dest } => {
            let bytes = pipeline.read_result(&job_id)?;
            write_file(&dest, &bytes)?;
            let written = serde_json::json!({ "job_id": job_id, "dest": dest, "bytes": bytes.len() });
            emit(json, &written, || format!("wrote {} bytes to {}", bytes.len(), dest.display()))
        }
        Commands::Bounds { job_id } => {
            let bounds = pipeline.result_bounds(&job_id)?;
            emit(json, &bounds, || {
                let b = &bounds.bounds;
                format!("{} {} {} {} ({})", b.min_x, b.min_y, b.max_x, b.max_y, bounds.crs)
            })
        }
        Commands::Jobs => {
            let jobs = pipeline.list_jobs()?;
            emit(json, &jobs, || {
                jobs.iter().map(JobId::to_string).collect::<Vec<_>>().join("\n")
            })
        }
        Commands::Delete { job_id } => {
            let outcome = pipeline.delete(&job_id)?;
            emit_outcome(json, &job_id, outcome)
        }
        Commands::Close { job_id } => {
            // The process exits right after, so wait for the worker here.
            let outcome = pipeline.close(&job_id).wait()?;
            emit_outcome(json, &job_id, outcome)
        }
        Commands::Purge { max_age_hours } => {
            let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));
            let removed = pipeline.purge_older_than(max_age)?;
            emit(json, &removed, || format!("purged {} jobs", removed.len()))
        }
    }
}

fn emit_outcome(json: bool, job_id: &JobId, outcome: DeleteOutcome) -> Result<(), RunnerError> {
    let value = serde_json::json!({ "job_id": job_id, "outcome": outcome });
    emit(json, &value, || match outcome {
        DeleteOutcome::Removed => format!("job {job_id} removed"),
        DeleteOutcome::NotFound => format!("job {job_id} not found, nothing to remove"),
    })
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<(), RunnerError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RunnerError> {
    let output = |source: std::io::Error| RunnerError::Output {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(output)?;
    }
    std::fs::write(path, bytes).map_err(output)
}
