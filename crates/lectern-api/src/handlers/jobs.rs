//! Job ledger and control routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use lectern_core::{new_v7, Error, Job, JobStatus};
use lectern_jobs::ControlOutcome;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub textbook_id: Uuid,
    /// Launch immediately (default true).
    #[serde(default)]
    pub start: Option<bool>,
}

/// Ledger row as returned by the API; the plan itself is not echoed back.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub textbook_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub percentage: f64,
    pub current_unit: Option<String>,
    pub total_units: i32,
    pub error_message: Option<String>,
    pub has_plan: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            textbook_id: job.textbook_id,
            status: job.status,
            progress: job.progress,
            percentage: (job.progress * 1000.0).round() / 10.0,
            current_unit: job.current_unit,
            total_units: job.total_units,
            error_message: job.error_message,
            has_plan: job.generation_plan.is_some(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

impl From<ControlOutcome> for ControlResponse {
    fn from(outcome: ControlOutcome) -> Self {
        Self {
            success: true,
            job_id: outcome.job_id,
            status: outcome.status,
            message: outcome.message,
        }
    }
}

async fn load(state: &AppState, job_id: Uuid) -> Result<Job, ApiError> {
    Ok(state
        .control
        .pipeline()
        .store()
        .get_job(job_id)
        .await?
        .ok_or(Error::JobNotFound(job_id))?)
}

/// POST /api/v1/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = new_v7();
    let store = state.control.pipeline().store();
    if !store.create_job(job_id, body.textbook_id, 0).await? {
        return Err(ApiError::Conflict(format!("Job {} already exists", job_id)));
    }
    info!(
        subsystem = "api",
        job_id = %job_id,
        textbook_id = %body.textbook_id,
        "Job created"
    );

    if body.start.unwrap_or(true) {
        state.control.start(job_id).await?;
    }
    let job = load(&state, job_id).await?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(JobResponse::from(load(&state, job_id).await?)))
}

/// POST /api/v1/jobs/:id/start
pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.control.start(job_id).await?;
    Ok(Json(ControlResponse::from(outcome)))
}

/// POST /api/v1/jobs/:id/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.control.pause(job_id).await?;
    Ok(Json(ControlResponse::from(outcome)))
}

/// POST /api/v1/jobs/:id/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.control.resume(job_id).await?;
    Ok(Json(ControlResponse::from(outcome)))
}

/// POST /api/v1/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.control.cancel(job_id).await?;
    Ok(Json(ControlResponse::from(outcome)))
}
