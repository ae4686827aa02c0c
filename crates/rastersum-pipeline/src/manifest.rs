//! Job manifest: the durable record of a job's progress.

use crate::job::JobId;
use crate::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current manifest schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Job status. Variants are ordered; a job only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Manifest created, no stage-1 output yet.
    Created,
    /// At least one stage-1 output recorded.
    Stage1Partial,
    /// Stage 2 produced the final output.
    Done,
}

/// Stage-1 progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage1State {
    /// Set once stage 2 has consumed the outputs.
    pub done: bool,
    /// Accumulated outputs, in call order, without duplicates.
    pub outputs: Vec<PathBuf>,
}

/// Stage-2 progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage2State {
    /// Whether the final output was produced.
    pub done: bool,
    /// Path of the final output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// One successful stage-1 call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Record {
    /// Output written by the call.
    pub output: PathBuf,
    /// Number of input layers supplied.
    pub inputs: usize,
    /// Number of layers dropped during alignment.
    pub dropped: usize,
    /// When the call completed.
    pub completed_at: DateTime<Utc>,
}

/// Versioned job manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub job_id: JobId,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every save; used to detect concurrent writers.
    pub revision: u64,
    pub status: JobStatus,
    pub stage1: Stage1State,
    pub stage2: Stage2State,
    #[serde(default)]
    pub stage1_runs: Vec<Stage1Record>,
}

impl Manifest {
    /// A fresh manifest in the `created` state.
    pub fn new(job_id: JobId, user: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            job_id,
            user,
            created_at: now,
            updated_at: now,
            revision: 0,
            status: JobStatus::Created,
            stage1: Stage1State::default(),
            stage2: Stage2State::default(),
            stage1_runs: Vec::new(),
        }
    }

    /// Move the status forward to `status`. Returns `false` (and changes
    /// nothing) if that would be a regression.
    pub fn advance_to(&mut self, status: JobStatus) -> bool {
        if status < self.status {
            return false;
        }
        self.status = status;
        true
    }

    /// Append a stage-1 output unless the same path is already recorded.
    pub fn append_output(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.stage1.outputs.contains(&path) {
            return false;
        }
        self.stage1.outputs.push(path);
        true
    }

    /// Record a completed stage-1 call: its output and the audit entry.
    pub fn record_stage1(&mut self, output: &Path, inputs: usize, dropped: usize) {
        self.append_output(output);
        self.stage1_runs.push(Stage1Record {
            output: output.to_path_buf(),
            inputs,
            dropped,
            completed_at: Utc::now(),
        });
        self.advance_to(JobStatus::Stage1Partial);
    }

    /// Record the final output and mark the job done.
    pub fn complete_stage2(&mut self, output: &Path) {
        self.stage1.done = true;
        self.stage2 = Stage2State {
            done: true,
            output: Some(output.to_path_buf()),
        };
        self.advance_to(JobStatus::Done);
    }

    /// Path of the final output, if stage 2 completed.
    pub fn final_output(&self) -> Option<&Path> {
        self.stage2.output.as_deref().filter(|_| self.stage2.done)
    }

    /// Parse a manifest, upgrading older schema versions.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value.get("schema_version").and_then(|v| v.as_u64()) {
            None => {
                let legacy: LegacyManifest = serde_json::from_value(value)?;
                Ok(legacy.upgrade())
            }
            Some(v) if v == SCHEMA_VERSION as u64 => Ok(serde_json::from_value(value)?),
            Some(found) => Err(PipelineError::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            }),
        }
    }

    /// Pretty JSON representation, as written to disk.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Unversioned manifest shape: epoch-seconds timestamps, no revision, and a
/// `stage2` object that may lack `output`.
#[derive(Debug, Deserialize)]
struct LegacyManifest {
    job_id: JobId,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    created_at: Option<f64>,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    stage1: Stage1State,
    #[serde(default)]
    stage2: Stage2State,
}

impl LegacyManifest {
    fn upgrade(self) -> Manifest {
        let created_at = self
            .created_at
            .and_then(epoch_to_datetime)
            .unwrap_or_else(Utc::now);
        let status = self.status.unwrap_or(if self.stage1.outputs.is_empty() {
            JobStatus::Created
        } else {
            JobStatus::Stage1Partial
        });
        Manifest {
            schema_version: SCHEMA_VERSION,
            job_id: self.job_id,
            user: self.user,
            created_at,
            updated_at: created_at,
            revision: 0,
            status,
            stage1: self.stage1,
            stage2: self.stage2,
            stage1_runs: Vec::new(),
        }
    }
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new(JobId::new("job1").unwrap(), Some("ana".to_string()))
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut m = manifest();
        assert!(m.advance_to(JobStatus::Stage1Partial));
        assert!(m.advance_to(JobStatus::Stage1Partial));
        assert!(m.advance_to(JobStatus::Done));
        assert!(!m.advance_to(JobStatus::Created));
        assert_eq!(m.status, JobStatus::Done);
    }

    #[test]
    fn test_append_output_deduplicates() {
        let mut m = manifest();
        assert!(m.append_output("/jobs/job1/stage1/outputs/a.tif"));
        assert!(m.append_output("/jobs/job1/stage1/outputs/b.tif"));
        assert!(!m.append_output("/jobs/job1/stage1/outputs/a.tif"));
        assert_eq!(m.stage1.outputs.len(), 2);
    }

    #[test]
    fn test_record_and_complete() {
        let mut m = manifest();
        m.record_stage1(Path::new("/o/a.tif"), 3, 1);
        m.record_stage1(Path::new("/o/a.tif"), 2, 0);
        assert_eq!(m.status, JobStatus::Stage1Partial);
        assert_eq!(m.stage1.outputs.len(), 1);
        assert_eq!(m.stage1_runs.len(), 2);
        assert_eq!(m.stage1_runs[0].dropped, 1);
        assert!(m.final_output().is_none());

        m.complete_stage2(Path::new("/f/final_result.tif"));
        assert_eq!(m.status, JobStatus::Done);
        assert!(m.stage1.done);
        assert_eq!(m.final_output(), Some(Path::new("/f/final_result.tif")));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut m = manifest();
        m.record_stage1(Path::new("/o/a.tif"), 2, 0);
        let json = m.to_json().unwrap();
        assert!(json.contains("\"status\": \"stage1_partial\""));
        assert!(json.contains("\"schema_version\": 1"));
        assert_eq!(Manifest::from_json(&json).unwrap(), m);
    }

    #[test]
    fn test_legacy_manifest_is_upgraded() {
        let legacy = r#"{
            "job_id": "1a2b3c4d",
            "user": null,
            "created_at": 1718000000.25,
            "status": "stage1_partial",
            "stage1": {"done": false, "outputs": ["/app/pipelines/1a2b3c4d/stage1/outputs/a.tif"]},
            "stage2": {"done": false}
        }"#;
        let m = Manifest::from_json(legacy).unwrap();
        assert_eq!(m.schema_version, SCHEMA_VERSION);
        assert_eq!(m.job_id.as_str(), "1a2b3c4d");
        assert_eq!(m.status, JobStatus::Stage1Partial);
        assert_eq!(m.created_at.timestamp(), 1_718_000_000);
        assert_eq!(m.created_at.timestamp_subsec_millis(), 250);
        assert_eq!(m.revision, 0);
        assert_eq!(m.stage1.outputs.len(), 1);
        assert!(m.stage2.output.is_none());
    }

    #[test]
    fn test_newer_schema_rejected() {
        let json = r#"{"schema_version": 9, "job_id": "x"}"#;
        assert!(matches!(
            Manifest::from_json(json),
            Err(PipelineError::UnsupportedSchema { found: 9, supported: 1 })
        ));
    }

    #[test]
    fn test_schema_zero_is_not_called_newer() {
        let err = Manifest::from_json(r#"{"schema_version": 0, "job_id": "x"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedSchema { found: 0, supported: 1 }));
        let message = err.to_string();
        assert!(message.contains("version 0 is not supported"), "{message}");
        assert!(!message.contains("newer"), "{message}");
    }
}
