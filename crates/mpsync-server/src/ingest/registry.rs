//! In-memory job registry
//!
//! The registry is the only structure shared between a job's worker and the
//! callers polling or cancelling it. Each job sits behind its own mutex so a
//! progress tick is applied as one critical section and readers never see
//! counters from two different ticks.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::jobs::{JobId, JobSnapshot, JobStatus, OwnerKey};

/// Registry operation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is {status}, not running")]
    NotRunning { id: JobId, status: JobStatus },

    #[error("Job {0} is already running for this account")]
    AlreadyRunning(JobId),
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Flag raised; the worker will stop at its next check point
    Requested,
    /// Job exists but already reached a terminal state
    NotRunning(JobStatus),
    NotFound,
}

struct JobEntry {
    state: Mutex<JobSnapshot>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn lock(&self) -> MutexGuard<'_, JobSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide map from job id to job state
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running job
    pub fn create(&self, owner: OwnerKey, total_target: u64, batch_size: u64) -> JobSnapshot {
        let job = JobSnapshot::new(owner, total_target, batch_size);
        self.insert(job.clone());
        job
    }

    /// Register a new running job unless `owner` already has one running
    ///
    /// The check and the insert happen under the same write lock.
    pub fn create_exclusive(
        &self,
        owner: OwnerKey,
        total_target: u64,
        batch_size: u64,
    ) -> Result<JobSnapshot, RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = running_for(&jobs, owner) {
            return Err(RegistryError::AlreadyRunning(existing));
        }

        let job = JobSnapshot::new(owner, total_target, batch_size);
        jobs.insert(job.id, Arc::new(new_entry(job.clone())));
        Ok(job)
    }

    fn insert(&self, job: JobSnapshot) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.id, Arc::new(new_entry(job)));
    }

    fn entry(&self, id: JobId) -> Option<Arc<JobEntry>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id).cloned()
    }

    /// Value copy of the job's current state
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.entry(id).map(|entry| entry.lock().clone())
    }

    /// Token the worker polls for cancellation
    pub fn cancellation(&self, id: JobId) -> Option<CancellationToken> {
        self.entry(id).map(|entry| entry.cancel.clone())
    }

    /// Raise the cancellation flag of a running job
    ///
    /// Status is left untouched; the worker moves the job to `cancelled` once
    /// it observes the flag.
    pub fn request_cancel(&self, id: JobId) -> CancelOutcome {
        let Some(entry) = self.entry(id) else {
            return CancelOutcome::NotFound;
        };

        let mut job = entry.lock();
        if job.status.is_terminal() {
            return CancelOutcome::NotRunning(job.status);
        }

        if !job.cancel_requested {
            job.cancel_requested = true;
            job.updated_at = Utc::now();
        }
        entry.cancel.cancel();
        CancelOutcome::Requested
    }

    /// Apply one progress tick to a running job
    ///
    /// Jobs that left `running` are never mutated again.
    pub fn update<F>(&self, id: JobId, mutator: F) -> Result<JobSnapshot, RegistryError>
    where
        F: FnOnce(&mut JobSnapshot),
    {
        let entry = self.entry(id).ok_or(RegistryError::NotFound(id))?;
        let mut job = entry.lock();

        if job.status.is_terminal() {
            return Err(RegistryError::NotRunning {
                id,
                status: job.status,
            });
        }

        mutator(&mut job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    /// Move a running job to a terminal state
    pub fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<JobSnapshot, RegistryError> {
        debug_assert!(status.is_terminal(), "finish() needs a terminal status");

        let entry = self.entry(id).ok_or(RegistryError::NotFound(id))?;
        let mut job = entry.lock();

        if job.status.is_terminal() {
            return Err(RegistryError::NotRunning {
                id,
                status: job.status,
            });
        }

        let now = Utc::now();
        job.status = status;
        job.completed_at = Some(now);
        job.updated_at = now;
        job.error_message = match status {
            JobStatus::Error => error_message,
            _ => None,
        };
        Ok(job.clone())
    }

    /// Jobs belonging to `owner`, newest first
    pub fn list(&self, owner: OwnerKey) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<JobSnapshot> = jobs
            .values()
            .map(|entry| entry.lock().clone())
            .filter(|job| job.owner == owner)
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        found
    }

    /// Id of a running job for `owner`, if any
    pub fn running_for(&self, owner: OwnerKey) -> Option<JobId> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        running_for(&jobs, owner)
    }

    /// Drop terminal jobs that finished more than `retention` ago
    ///
    /// Running jobs are never removed. Returns how many jobs were dropped.
    pub fn reap_finished(&self, retention: std::time::Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(retention);
        self.reap_before(cutoff)
    }

    fn reap_before(&self, cutoff: Option<DateTime<Utc>>) -> usize {
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let job = entry.lock();
            !matches!(job.completed_at, Some(done) if job.status.is_terminal() && done <= cutoff)
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn new_entry(job: JobSnapshot) -> JobEntry {
    JobEntry {
        state: Mutex::new(job),
        cancel: CancellationToken::new(),
    }
}

fn running_for(jobs: &HashMap<JobId, Arc<JobEntry>>, owner: OwnerKey) -> Option<JobId> {
    jobs.values().find_map(|entry| {
        let job = entry.lock();
        (job.owner == owner && job.status == JobStatus::Running).then_some(job.id)
    })
}
