//! Job model for background imports
//!
//! A [`JobSnapshot`] is both the state the registry keeps for a job and the
//! value copy handed to pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of an import job
pub type JobId = Uuid;

/// Tenant scoping applied to every record an import reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    /// Company (tenant) id
    pub company_id: i64,
    /// Marketplace account id within the company
    pub account_id: i64,
}

impl OwnerKey {
    pub fn new(company_id: i64, account_id: i64) -> Self {
        Self {
            company_id,
            account_id,
        }
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.company_id, self.account_id)
    }
}

/// Import job status
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Records the job has moved past, successful or not
    pub processed: u64,
    /// Records inserted for the first time
    pub created: u64,
    /// Records that already existed and were refreshed
    pub updated: u64,
    /// Failed records, failed pages and failed commits
    pub errors: u64,
    /// Records counted as created or updated whose batch commit then failed
    pub rolled_back: u64,
}

/// Point-in-time copy of an import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub owner: OwnerKey,
    pub status: JobStatus,
    pub total_target: u64,
    pub batch_size: u64,
    pub current_batch: u64,
    pub total_batches: u64,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobSnapshot {
    /// New job in `running` state
    ///
    /// `batch_size` must be non-zero; callers validate before creating jobs.
    pub fn new(owner: OwnerKey, total_target: u64, batch_size: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            status: JobStatus::Running,
            total_target,
            batch_size,
            current_batch: 0,
            total_batches: total_batches(total_target, batch_size),
            counters: JobCounters::default(),
            cancel_requested: false,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
        }
    }

    /// Share of the target already processed, 0.0 to 100.0
    pub fn progress_percent(&self) -> f64 {
        if self.total_target == 0 {
            return 0.0;
        }
        let pct = self.counters.processed as f64 / self.total_target as f64 * 100.0;
        pct.min(100.0)
    }

    /// Records that ended up stored (created or updated) as a percentage of processed
    pub fn success_rate(&self) -> f64 {
        if self.counters.processed == 0 {
            return 0.0;
        }
        (self.counters.created + self.counters.updated) as f64 / self.counters.processed as f64
            * 100.0
    }

    /// Throughput since the job started, up to completion if finished
    pub fn items_per_second(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        let secs = (end - self.started_at).num_milliseconds() as f64 / 1000.0;
        if secs > 0.0 {
            self.counters.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// `ceil(total_target / batch_size)`, zero for an empty batch size
pub fn total_batches(total_target: u64, batch_size: u64) -> u64 {
    if batch_size == 0 {
        return 0;
    }
    total_target.div_ceil(batch_size)
}
