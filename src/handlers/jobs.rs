//! # Jobs API Handlers
//!
//! Start, inspect, pause, cancel and resume order sync jobs.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::models::sync_job::{self, JobStatus};
use crate::repositories::sync_job::{ControlOutcome, NewSyncJob};
use crate::server::AppState;
use crate::sync::SyncWindow;

/// Request body for starting a sync job
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartJobRequest {
    /// Optional caller-chosen job id
    pub job_id: Option<Uuid>,
    /// First day of the window (`YYYY-MM-DD`, inclusive)
    #[schema(example = "2024-05-01")]
    pub from_date: String,
    /// Last day of the window (`YYYY-MM-DD`, inclusive)
    #[schema(example = "2024-05-31")]
    pub to_date: String,
    pub owner_id: String,
    pub owner_email: String,
    #[serde(default)]
    pub owner_name: String,
}

/// Acknowledgement returned when a job is enqueued
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartJobResponse {
    pub success: bool,
    pub job_id: Uuid,
}

/// Request body for resuming a job
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ResumeJobRequest {
    /// Ordinal the caller believes the job stopped at; only cross-checked
    #[serde(default)]
    pub resume_from: Option<i32>,
}

/// Result of a pause, cancel or resume request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobControlResponse {
    pub success: bool,
    pub job_id: Uuid,
    /// Job status after the request
    #[schema(example = "paused")]
    pub status: String,
    /// True when the request was queued for the running worker
    pub queued: bool,
}

/// Snapshot of a sync job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "order_sync")]
    pub job_type: String,
    #[schema(example = "running")]
    pub status: String,
    #[schema(example = "2024-05-01")]
    pub from_date: String,
    #[schema(example = "2024-05-31")]
    pub to_date: String,
    pub owner_id: String,
    pub owner_email: String,
    pub total_orders: i32,
    pub processed_orders: i32,
    pub successful_orders: i32,
    pub failed_orders: i32,
    pub skipped_orders: i32,
    pub current_order_number: Option<String>,
    pub last_order_number: Option<String>,
    pub run_id: Option<String>,
    pub error_message: Option<String>,
    pub email_sent: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            job_type: model.job_type,
            status: model.status,
            from_date: model.from_date.to_string(),
            to_date: model.to_date.to_string(),
            owner_id: model.owner_id,
            owner_email: model.owner_email,
            total_orders: model.total_orders,
            processed_orders: model.processed_orders,
            successful_orders: model.successful_orders,
            failed_orders: model.failed_orders,
            skipped_orders: model.skipped_orders,
            current_order_number: model.current_order_number,
            last_order_number: model.last_order_number,
            run_id: model.run_id.map(|id| id.to_string()),
            error_message: model.error_message,
            email_sent: model.email_sent,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Enqueue an order sync job for a date window
#[utoipa::path(
    post,
    path = "/sync/jobs",
    request_body = StartJobRequest,
    responses(
        (status = 202, description = "Job enqueued", body = StartJobResponse, example = json!({
            "success": true,
            "job_id": "550e8400-e29b-41d4-a716-446655440000"
        })),
        (status = 400, description = "Invalid window or owner", body = ApiError),
        (status = 409, description = "Job id already exists", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn start_job(
    State(state): State<AppState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    let Json(request) = payload?;

    let window = SyncWindow::parse(&request.from_date, &request.to_date)?;

    if request.owner_id.trim().is_empty() {
        return Err(validation_error(
            "Owner is required",
            serde_json::json!({ "owner_id": "must not be empty" }),
        ));
    }
    if !request.owner_email.contains('@') {
        return Err(validation_error(
            "Owner email is invalid",
            serde_json::json!({ "owner_email": "must be an e-mail address" }),
        ));
    }

    let job = state
        .controller
        .start(NewSyncJob {
            id: request.job_id,
            window,
            owner_id: request.owner_id.trim().to_string(),
            owner_email: request.owner_email.trim().to_string(),
            owner_name: request.owner_name.trim().to_string(),
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            success: true,
            job_id: job.id,
        }),
    ))
}

/// Fetch the current state of a job
#[utoipa::path(
    get,
    path = "/sync/jobs/{id}",
    params(("id" = Uuid, Path, description = "Sync job id")),
    responses(
        (status = 200, description = "Job snapshot", body = JobInfo),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state.controller.jobs().get(job_id).await?;
    Ok(Json(job.into()))
}

/// Request a cooperative pause
#[utoipa::path(
    post,
    path = "/sync/jobs/{id}/pause",
    params(("id" = Uuid, Path, description = "Sync job id")),
    responses(
        (status = 200, description = "Job paused", body = JobControlResponse),
        (status = 202, description = "Pause queued for the running job", body = JobControlResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job already finished", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobControlResponse>), ApiError> {
    let outcome = state.controller.pause(job_id).await?;
    Ok(control_response(job_id, outcome))
}

/// Request cancellation
#[utoipa::path(
    post,
    path = "/sync/jobs/{id}/cancel",
    params(("id" = Uuid, Path, description = "Sync job id")),
    responses(
        (status = 200, description = "Job cancelled", body = JobControlResponse),
        (status = 202, description = "Cancel queued for the running job", body = JobControlResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job already finished", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobControlResponse>), ApiError> {
    let outcome = state.controller.cancel(job_id).await?;
    Ok(control_response(job_id, outcome))
}

/// Requeue a paused (or stale running) job from its checkpoint
#[utoipa::path(
    post,
    path = "/sync/jobs/{id}/resume",
    params(("id" = Uuid, Path, description = "Sync job id")),
    request_body = ResumeJobRequest,
    responses(
        (status = 202, description = "Job requeued", body = JobControlResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job cannot be resumed in its current state", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    payload: Result<Json<ResumeJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobControlResponse>), ApiError> {
    let resume_from = match payload {
        Ok(Json(request)) => request.resume_from,
        // An empty body is a resume without a hint
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(rejection) => return Err(rejection.into()),
    };

    let job = state.controller.resume(job_id, resume_from).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobControlResponse {
            success: true,
            job_id,
            status: job.status,
            queued: false,
        }),
    ))
}

fn control_response(
    job_id: Uuid,
    outcome: ControlOutcome,
) -> (StatusCode, Json<JobControlResponse>) {
    let (code, status, queued) = match outcome {
        ControlOutcome::Applied(status) | ControlOutcome::Unchanged(status) => {
            (StatusCode::OK, status, false)
        }
        ControlOutcome::Queued(_) => (StatusCode::ACCEPTED, JobStatus::Running, true),
    };

    (
        code,
        Json(JobControlResponse {
            success: true,
            job_id,
            status: status.as_str().to_string(),
            queued,
        }),
    )
}
