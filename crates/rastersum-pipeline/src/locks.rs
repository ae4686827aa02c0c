//! In-process mutual exclusion per job id.

use crate::job::JobId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// Set of jobs currently being mutated.
#[derive(Debug, Default)]
pub(crate) struct JobLocks {
    busy: Mutex<HashSet<JobId>>,
    released: Condvar,
}

impl JobLocks {
    /// Block until no other holder owns `job`, then take it.
    pub(crate) fn acquire(self: &Arc<Self>, job: &JobId) -> JobGuard {
        let mut busy = self.busy.lock();
        while busy.contains(job) {
            trace!(job_id = %job, "Waiting for job lock");
            self.released.wait(&mut busy);
        }
        busy.insert(job.clone());
        JobGuard {
            locks: Arc::clone(self),
            job: job.clone(),
        }
    }

    #[cfg(test)]
    fn is_held(&self, job: &JobId) -> bool {
        self.busy.lock().contains(job)
    }
}

/// Releases the job when dropped.
#[derive(Debug)]
pub(crate) struct JobGuard {
    locks: Arc<JobLocks>,
    job: JobId,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.locks.busy.lock().remove(&self.job);
        self.locks.released.notify_all();
    }
}
