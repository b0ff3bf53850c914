//! Background import orchestrator
//!
//! Entry point for starting, polling and cancelling imports. Starting an
//! import registers the job and spawns a detached worker; the caller gets the
//! job id back immediately and polls the registry from then on.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use super::config::{DuplicatePolicy, ImportConfig};
use super::jobs::{JobId, JobSnapshot, JobStatus, OwnerKey};
use super::registry::{CancelOutcome, JobRegistry, RegistryError};
use super::resources::ResourceProvider;
use super::worker::ImportWorker;

/// Errors returned to callers of [`ImportOrchestrator::start_import`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("{0}")]
    Validation(String),

    #[error("An import is already running for this account (job {0})")]
    AlreadyRunning(JobId),
}

/// Answer to a cancellation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

impl From<CancelOutcome> for CancelResponse {
    fn from(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::Requested => Self {
                success: true,
                message: "Cancellation requested".to_string(),
            },
            CancelOutcome::NotRunning(status) => Self {
                success: false,
                message: format!("Job is already {status}"),
            },
            CancelOutcome::NotFound => Self {
                success: false,
                message: "Job not found".to_string(),
            },
        }
    }
}

/// Starts import workers and answers status and cancel requests
pub struct ImportOrchestrator {
    registry: Arc<JobRegistry>,
    resources: Arc<dyn ResourceProvider>,
    config: ImportConfig,
}

impl ImportOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        resources: Arc<dyn ResourceProvider>,
        config: ImportConfig,
    ) -> Self {
        Self {
            registry,
            resources,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Register a job for `owner` and start its worker in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_import(&self, owner: OwnerKey, total_target: u64) -> Result<JobId, ImportError> {
        if total_target == 0 {
            return Err(ImportError::Validation(
                "total_orders must be greater than 0".to_string(),
            ));
        }
        if total_target > self.config.max_target {
            return Err(ImportError::Validation(format!(
                "total_orders cannot exceed {}",
                self.config.max_target
            )));
        }

        let batch_size = self.config.batch_size;
        let job = match self.config.duplicate_policy {
            DuplicatePolicy::Allow => self.registry.create(owner, total_target, batch_size),
            DuplicatePolicy::Reject => self
                .registry
                .create_exclusive(owner, total_target, batch_size)
                .map_err(|e| match e {
                    RegistryError::AlreadyRunning(id) => ImportError::AlreadyRunning(id),
                    other => ImportError::Validation(other.to_string()),
                })?,
        };

        let span = info_span!(
            "import",
            job_id = %job.id,
            company_id = owner.company_id,
            account_id = owner.account_id
        );
        let launch = WorkerLaunch {
            job: job.clone(),
            registry: Arc::clone(&self.registry),
            resources: Arc::clone(&self.resources),
            config: self.config.clone(),
        };
        tokio::spawn(launch.run().instrument(span));

        info!(job_id = %job.id, %owner, total_target, "Import job started");
        Ok(job.id)
    }

    pub fn get_status(&self, id: JobId) -> Option<JobSnapshot> {
        self.registry.get(id)
    }

    pub fn cancel(&self, id: JobId) -> CancelResponse {
        self.request_cancel(id).into()
    }

    /// Raise the cancellation flag and report what the registry found
    pub fn request_cancel(&self, id: JobId) -> CancelOutcome {
        let outcome = self.registry.request_cancel(id);
        if outcome == CancelOutcome::Requested {
            info!(job_id = %id, "Import cancellation requested");
        }
        outcome
    }

    pub fn list_jobs(&self, owner: OwnerKey) -> Vec<JobSnapshot> {
        self.registry.list(owner)
    }

    /// Periodically drop finished jobs older than `retention`
    pub fn spawn_reaper(&self, retention: Duration, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = registry.reap_finished(retention);
                if removed > 0 {
                    info!("Reaped {} finished import jobs", removed);
                }
            }
        })
    }
}

/// Inputs of a detached worker task
struct WorkerLaunch {
    job: JobSnapshot,
    registry: Arc<JobRegistry>,
    resources: Arc<dyn ResourceProvider>,
    config: ImportConfig,
}

impl WorkerLaunch {
    async fn run(self) {
        let Self {
            job,
            registry,
            resources,
            config,
        } = self;

        let Some(cancel) = registry.cancellation(job.id) else {
            error!("Job disappeared before its worker started");
            return;
        };

        let resources = match resources.open(&job.owner).await {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to open worker resources");
                let status = if cancel.is_cancelled() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Error
                };
                if let Err(e) = registry.finish(job.id, status, Some(format!("{e:#}"))) {
                    error!(error = %e, "Failed to finalize import job");
                }
                return;
            }
        };

        ImportWorker::new(&job, registry, cancel, config.pacing, resources)
            .run()
            .await;
    }
}
