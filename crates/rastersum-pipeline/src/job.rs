//! Job identifiers and per-job working directories.

use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier, safe to use as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Longest accepted identifier.
    pub const MAX_LEN: usize = 64;

    /// Validate an identifier supplied by a caller.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(id))
        } else {
            Err(PipelineError::InvalidJobId(id))
        }
    }

    /// Generate a fresh identifier: 8 hex characters from a random UUID.
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Working directories of one job, all under `<root>/<job_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirs {
    /// The job's root directory.
    pub root: PathBuf,
    /// Uploaded stage-1 inputs.
    pub stage1_inputs: PathBuf,
    /// One output per stage-1 call.
    pub stage1_outputs: PathBuf,
    /// Alignment scratch for stage 1.
    pub stage1_aligned: PathBuf,
    /// Alignment scratch for stage 2.
    pub stage2_aligned: PathBuf,
    /// Stage-2 work area.
    pub stage2_work: PathBuf,
    /// Final output.
    pub final_dir: PathBuf,
}

impl JobDirs {
    /// Compute the directory layout of `job` under `jobs_root`.
    pub fn new(jobs_root: &Path, job: &JobId) -> Self {
        let root = jobs_root.join(job.as_str());
        Self {
            stage1_inputs: root.join("stage1").join("inputs"),
            stage1_outputs: root.join("stage1").join("outputs"),
            stage1_aligned: root.join("stage1").join("aligned"),
            stage2_aligned: root.join("stage2").join("aligned"),
            stage2_work: root.join("stage2").join("work"),
            final_dir: root.join("final"),
            root,
        }
    }

    /// Create every directory of the layout.
    pub fn create(&self) -> io::Result<()> {
        for dir in [
            &self.stage1_inputs,
            &self.stage1_outputs,
            &self.stage1_aligned,
            &self.stage2_aligned,
            &self.stage2_work,
            &self.final_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Whether the job's root directory exists.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Recursively remove the job. Returns `false` if it did not exist.
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
