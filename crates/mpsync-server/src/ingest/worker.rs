//! Import worker
//!
//! Drives one job from the first page to a terminal state: pages are pulled in
//! increasing offset order, each item is fetched in detail and persisted, and
//! every outcome is reported to the registry as a single progress tick.
//!
//! Item and page failures are counted and skipped. Only a missing account or
//! token ends the job with `error`. Cancellation is checked before each page,
//! before the items of a page, and before each item; pacing sleeps end early
//! when it is raised.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accounts::SourceAccount;
use super::config::Pacing;
use super::jobs::{JobId, JobSnapshot, JobStatus, OwnerKey};
use super::pager::{FetchError, RawRecord};
use super::registry::{JobRegistry, RegistryError};
use super::resources::WorkerResources;
use super::sink::PersistOutcome;

/// Errors that end a job with `error`
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No active marketplace account with a valid token for {0}")]
    MissingCredentials(OwnerKey),

    #[error("Failed to resolve marketplace credentials: {0:#}")]
    Resolver(anyhow::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Worker owning one job and the resources it runs on
pub struct ImportWorker {
    job_id: JobId,
    owner: OwnerKey,
    total_target: u64,
    batch_size: u64,
    pacing: Pacing,
    registry: Arc<JobRegistry>,
    cancel: CancellationToken,
    resources: WorkerResources,
}

impl ImportWorker {
    pub fn new(
        job: &JobSnapshot,
        registry: Arc<JobRegistry>,
        cancel: CancellationToken,
        pacing: Pacing,
        resources: WorkerResources,
    ) -> Self {
        Self {
            job_id: job.id,
            owner: job.owner,
            total_target: job.total_target,
            batch_size: job.batch_size,
            pacing,
            registry,
            cancel,
            resources,
        }
    }

    /// Run the job to completion and record its terminal state
    ///
    /// Returns the final snapshot, or `None` if the job could not be finalized.
    pub async fn run(mut self) -> Option<JobSnapshot> {
        info!(
            "Import started for {}: {} records in batches of {}",
            self.owner, self.total_target, self.batch_size
        );

        let result = self.import().await;
        let cancelled = self.cancel.is_cancelled();

        let (status, message) = match result {
            Ok(()) if cancelled => (JobStatus::Cancelled, None),
            Ok(()) => (JobStatus::Completed, None),
            Err(e) if cancelled => {
                warn!(error = %e, "Import failed after cancellation was requested");
                (JobStatus::Cancelled, None)
            }
            Err(e) => {
                error!(error = %e, "Import failed");
                (JobStatus::Error, Some(e.to_string()))
            }
        };

        match self.registry.finish(self.job_id, status, message) {
            Ok(job) => {
                info!(
                    status = %job.status,
                    processed = job.counters.processed,
                    created = job.counters.created,
                    updated = job.counters.updated,
                    errors = job.counters.errors,
                    rolled_back = job.counters.rolled_back,
                    "Import finished"
                );
                Some(job)
            }
            Err(e) => {
                error!(error = %e, "Failed to finalize import job");
                None
            }
        }
    }

    async fn import(&mut self) -> Result<(), WorkerError> {
        let mut account = self.resolve_account().await?;
        let mut offset = 0u64;
        let mut batch = 1u64;

        while offset < self.total_target {
            if self.cancel.is_cancelled() {
                info!(batch, offset, "Cancellation requested, stopping before next page");
                break;
            }

            self.registry
                .update(self.job_id, |job| job.current_batch = batch)?;

            let limit = self.batch_size.min(self.total_target - offset);

            let page = match self.resources.pager.fetch_page(&account, offset, limit).await {
                Err(FetchError::Unauthorized(status)) => {
                    warn!(batch, offset, %status, "Access token rejected, resolving credentials again");
                    account = self.resolve_account().await?;
                    self.resources.pager.fetch_page(&account, offset, limit).await
                }
                other => other,
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    warn!(batch, offset, error = %e, "Page fetch failed, skipping {} records", limit);
                    self.registry.update(self.job_id, |job| {
                        job.counters.errors += 1;
                        job.counters.processed += limit;
                    })?;
                    offset += self.batch_size;
                    batch += 1;
                    continue;
                }
            };

            if page.is_empty() {
                info!(batch, offset, "Source returned an empty page, no more records");
                break;
            }

            let stored = if self.cancel.is_cancelled() {
                0
            } else {
                self.process_page(&account, &page, limit).await?
            };

            if let Err(e) = self.resources.sink.commit_batch().await {
                error!(
                    batch,
                    offset,
                    rolled_back = stored,
                    error = %format!("{e:#}"),
                    "Batch commit failed"
                );
                self.registry.update(self.job_id, |job| {
                    job.counters.errors += 1;
                    job.counters.rolled_back += stored;
                })?;
            }

            if let Some(job) = self.registry.get(self.job_id) {
                info!(
                    batch,
                    offset,
                    processed = job.counters.processed,
                    "Batch {}/{} done ({:.1}%)",
                    batch,
                    job.total_batches,
                    job.progress_percent()
                );
            }

            offset += self.batch_size;
            batch += 1;

            if offset < self.total_target && !self.cancel.is_cancelled() {
                pause(&self.cancel, self.pacing.per_batch_delay).await;
            }
        }

        Ok(())
    }

    /// Handle the items of one page
    ///
    /// Returns how many records were stored, pending the batch commit.
    async fn process_page(
        &mut self,
        account: &SourceAccount,
        page: &[RawRecord],
        limit: u64,
    ) -> Result<u64, WorkerError> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut stored = 0;

        for (idx, raw) in page.iter().take(limit).enumerate() {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, skipping rest of page");
                break;
            }
            if idx > 0 && pause(&self.cancel, self.pacing.per_item_delay).await {
                info!("Cancellation requested, skipping rest of page");
                break;
            }

            let outcome = match self.resources.fetcher.fetch(account, raw).await {
                Ok(record) => self.resources.sink.persist(&record, &self.owner).await,
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(kind) => {
                    stored += 1;
                    debug!(external_id = ?raw.external_id(), ?kind, "Record stored")
                }
                Err(e) => warn!(external_id = ?raw.external_id(), error = %format!("{e:#}"), "Record failed"),
            }

            self.registry.update(self.job_id, |job| {
                job.counters.processed += 1;
                match outcome {
                    Ok(PersistOutcome::Created) => job.counters.created += 1,
                    Ok(PersistOutcome::Updated) => job.counters.updated += 1,
                    Err(_) => job.counters.errors += 1,
                }
            })?;
        }

        Ok(stored)
    }

    async fn resolve_account(&mut self) -> Result<SourceAccount, WorkerError> {
        self.resources
            .accounts
            .resolve(&self.owner)
            .await
            .map_err(WorkerError::Resolver)?
            .ok_or(WorkerError::MissingCredentials(self.owner))
    }
}

/// Sleep for `duration` unless cancellation is raised first
///
/// Returns `true` when the job was cancelled.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_runs_full_duration() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(!pause(&cancel, Duration::from_secs(10)).await);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_ends_early_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(pause(&cancel, Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_pause_reports_cancellation() {
        let cancel = CancellationToken::new();
        assert!(!pause(&cancel, Duration::ZERO).await);
        cancel.cancel();
        assert!(pause(&cancel, Duration::ZERO).await);
    }
}
