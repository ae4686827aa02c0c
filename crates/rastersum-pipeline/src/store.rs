//! File-backed manifest store: one `manifest.json` per job directory.

use crate::job::JobId;
use crate::manifest::Manifest;
use crate::{PipelineError, Result};
use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stores manifests at `<root>/<job_id>/manifest.json`.
///
/// Every write goes to a temporary file in the job directory and is renamed
/// over the manifest, so readers never observe a half-written record.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    /// File name of a job's manifest.
    pub const FILE_NAME: &'static str = "manifest.json";

    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding one subdirectory per job.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest path of `job`.
    pub fn path_for(&self, job: &JobId) -> PathBuf {
        self.root.join(job.as_str()).join(Self::FILE_NAME)
    }

    /// Whether `job` has a manifest.
    pub fn exists(&self, job: &JobId) -> bool {
        self.path_for(job).is_file()
    }

    /// Load the manifest of `job`, or `None` if there is none.
    pub fn load(&self, job: &JobId) -> Result<Option<Manifest>> {
        let path = self.path_for(job);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Manifest::from_json(&json).map(Some)
    }

    /// Persist a new manifest. Fails with a conflict if one already exists.
    pub fn create(&self, manifest: &Manifest) -> Result<()> {
        if let Some(existing) = self.load(&manifest.job_id)? {
            return Err(PipelineError::ManifestConflict {
                job_id: manifest.job_id.to_string(),
                expected: manifest.revision,
                found: existing.revision,
            });
        }
        self.write(manifest)
    }

    /// Save `manifest` if the stored revision still matches its revision.
    ///
    /// On success the revision is incremented and `updated_at` refreshed. A
    /// mismatch means another writer saved in between; nothing is written.
    pub fn save(&self, manifest: &mut Manifest) -> Result<()> {
        let stored = self
            .load(&manifest.job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(manifest.job_id.to_string()))?;
        if stored.revision != manifest.revision {
            warn!(
                job_id = %manifest.job_id,
                expected = manifest.revision,
                found = stored.revision,
                "Manifest revision conflict"
            );
            return Err(PipelineError::ManifestConflict {
                job_id: manifest.job_id.to_string(),
                expected: manifest.revision,
                found: stored.revision,
            });
        }

        let mut next = manifest.clone();
        next.revision += 1;
        next.updated_at = Utc::now();
        self.write(&next)?;
        *manifest = next;
        Ok(())
    }

    /// Ids of all jobs that have a manifest, sorted.
    pub fn list_jobs(&self) -> Result<Vec<JobId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(job) = JobId::new(name) {
                if self.exists(&job) {
                    jobs.push(job);
                }
            }
        }
        jobs.sort();
        Ok(jobs)
    }

    fn write(&self, manifest: &Manifest) -> Result<()> {
        let path = self.path_for(&manifest.job_id);
        let dir = path
            .parent()
            .ok_or_else(|| PipelineError::ConfigError("manifest path has no parent".to_string()))?;
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{}.tmp", Self::FILE_NAME));
        let json = manifest.to_json()?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(job_id = %manifest.job_id, revision = manifest.revision, "Manifest written");
        Ok(())
    }
}
