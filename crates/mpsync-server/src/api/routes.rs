//! Import routes
//!
//! Start, poll, cancel and list background imports. Handlers never wait for a
//! worker; they only touch the job registry.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::ingest::{CancelOutcome, CancelResponse, JobId, JobSnapshot, OwnerKey};

/// Create import routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import-background", post(start_import))
        .route("/import-status/:job_id", get(import_status))
        .route("/import-cancel/:job_id", post(cancel_import))
        .route("/import-jobs", get(list_imports))
}

#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    pub company_id: i64,
    pub ml_account_id: i64,
    pub total_orders: i64,
}

#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub job_id: JobId,
    pub message: String,
}

/// Job snapshot plus derived progress figures
#[derive(Debug, Serialize)]
pub struct JobStatusView {
    #[serde(flatten)]
    pub job: JobSnapshot,
    pub progress_percent: f64,
    pub success_rate: f64,
    pub items_per_second: f64,
}

impl From<JobSnapshot> for JobStatusView {
    fn from(job: JobSnapshot) -> Self {
        Self {
            progress_percent: round2(job.progress_percent()),
            success_rate: round2(job.success_rate()),
            items_per_second: round2(job.items_per_second()),
            job,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListImportsQuery {
    pub company_id: i64,
    pub ml_account_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ListImportsResponse {
    pub jobs: Vec<JobStatusView>,
}

/// Start a background import
///
/// POST /import-background
async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> Result<Json<StartImportResponse>, AppError> {
    let total_orders = u64::try_from(request.total_orders)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| AppError::Validation("total_orders must be greater than 0".to_string()))?;

    let owner = OwnerKey::new(request.company_id, request.ml_account_id);
    let job_id = state.orchestrator.start_import(owner, total_orders)?;

    Ok(Json(StartImportResponse {
        job_id,
        message: format!("Import of {total_orders} orders started in the background"),
    }))
}

/// Poll one job
///
/// GET /import-status/:job_id
async fn import_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, AppError> {
    let job = parse_job_id(&job_id)
        .and_then(|id| state.orchestrator.get_status(id))
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;

    Ok(Json(job.into()))
}

/// Request cancellation of a running job
///
/// POST /import-cancel/:job_id
async fn cancel_import(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let outcome = parse_job_id(&job_id)
        .map_or(CancelOutcome::NotFound, |id| state.orchestrator.request_cancel(id));

    cancel_reply(&job_id, outcome)
}

/// Unknown jobs are a 404; every other outcome is answered in the body
fn cancel_reply(job_id: &str, outcome: CancelOutcome) -> Result<Json<CancelResponse>, AppError> {
    match outcome {
        CancelOutcome::NotFound => Err(AppError::NotFound(format!("Job {job_id} not found"))),
        outcome => Ok(Json(outcome.into())),
    }
}

/// Jobs of one marketplace account, newest first
///
/// GET /import-jobs?company_id=1&ml_account_id=2
async fn list_imports(
    State(state): State<AppState>,
    Query(query): Query<ListImportsQuery>,
) -> Json<ListImportsResponse> {
    let owner = OwnerKey::new(query.company_id, query.ml_account_id);
    let jobs = state
        .orchestrator
        .list_jobs(owner)
        .into_iter()
        .map(JobStatusView::from)
        .collect();

    Json(ListImportsResponse { jobs })
}

fn parse_job_id(raw: &str) -> Option<JobId> {
    Uuid::parse_str(raw).ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
