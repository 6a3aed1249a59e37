//! # Runs API Handlers
//!
//! Audit trail of sync runs, and the retry endpoints built on it.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, SyncEngineError};
use crate::models::{SyncRun, SyncRunDetail, sync_run, sync_run_detail};
use crate::server::AppState;
use crate::sync::{FailureClass, RetryScope, RetrySummary};

/// Summary of a sync run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunInfo {
    pub id: String,
    #[schema(example = "2024-05-01")]
    pub from_date: String,
    #[schema(example = "2024-05-31")]
    pub to_date: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub total_orders: i32,
    pub successful_orders: i32,
    pub failed_orders: i32,
    pub skipped_orders: i32,
    #[schema(example = "completed")]
    pub status: String,
    pub created_by: String,
}

impl From<sync_run::Model> for RunInfo {
    fn from(model: sync_run::Model) -> Self {
        Self {
            id: model.id.to_string(),
            from_date: model.from_date.to_string(),
            to_date: model.to_date.to_string(),
            start_time: model.start_time.to_rfc3339(),
            end_time: model.end_time.map(|dt| dt.to_rfc3339()),
            total_orders: model.total_orders,
            successful_orders: model.successful_orders,
            failed_orders: model.failed_orders,
            skipped_orders: model.skipped_orders,
            status: model.status,
            created_by: model.created_by,
        }
    }
}

/// Per-order outcome inside a run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunDetailInfo {
    pub id: String,
    pub order_number: String,
    pub order_date: String,
    pub customer_phone: Option<String>,
    pub product_names: String,
    pub total_amount: f64,
    #[schema(example = "failed")]
    pub sync_status: String,
    pub error_message: Option<String>,
    pub step_customer: String,
    pub step_brand: String,
    pub step_product: String,
    pub step_order: String,
    pub step_purchase: String,
    pub retry_count: i32,
    /// Which part a retry of this row would target
    pub failure_class: FailureClass,
    pub updated_at: String,
}

impl RunDetailInfo {
    fn new(model: sync_run_detail::Model, failure_class: FailureClass) -> Self {
        Self {
            id: model.id.to_string(),
            order_number: model.order_number,
            order_date: model.order_date.to_string(),
            customer_phone: model.customer_phone,
            product_names: model.product_names,
            total_amount: model.total_amount,
            sync_status: model.sync_status,
            error_message: model.error_message,
            step_customer: model.step_customer,
            step_brand: model.step_brand,
            step_product: model.step_product,
            step_order: model.step_order,
            step_purchase: model.step_purchase,
            retry_count: model.retry_count,
            failure_class,
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Detail rows of a run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunDetailsResponse {
    pub run_id: String,
    pub details: Vec<RunDetailInfo>,
}

/// Request body for retrying one detail row
#[derive(Debug, Deserialize, ToSchema)]
pub struct RetryRequest {
    pub detail_id: Uuid,
    /// `all`, `order`, `purchase`, or any other step name
    #[schema(example = "order")]
    pub retry_type: String,
}

/// Outcome of a single retry
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryResponse {
    /// True when the order is now fully synced
    pub success: bool,
    pub detail_id: Uuid,
    #[schema(example = "success")]
    pub sync_status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
}

/// Fetch a run summary
#[utoipa::path(
    get,
    path = "/sync/runs/{id}",
    params(("id" = Uuid, Path, description = "Sync run id")),
    responses(
        (status = 200, description = "Run summary", body = RunInfo),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunInfo>, ApiError> {
    let run = SyncRun::find_by_id(run_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| SyncEngineError::not_found("sync run", run_id))?;
    Ok(Json(run.into()))
}

/// List the detail rows of a run with their failure classification
#[utoipa::path(
    get,
    path = "/sync/runs/{id}/details",
    params(("id" = Uuid, Path, description = "Sync run id")),
    responses(
        (status = 200, description = "Detail rows", body = RunDetailsResponse),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn list_run_details(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetailsResponse>, ApiError> {
    SyncRun::find_by_id(run_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| SyncEngineError::not_found("sync run", run_id))?;

    let details = SyncRunDetail::find()
        .filter(sync_run_detail::Column::RunId.eq(run_id))
        .order_by_asc(sync_run_detail::Column::CreatedAt)
        .order_by_asc(sync_run_detail::Column::OrderNumber)
        .all(&state.db)
        .await?;

    let details = details
        .into_iter()
        .map(|detail| {
            let class = state.classifier.classify_detail(&detail);
            RunDetailInfo::new(detail, class)
        })
        .collect();

    Ok(Json(RunDetailsResponse {
        run_id: run_id.to_string(),
        details,
    }))
}

/// Retry one order, or one step of it, synchronously
#[utoipa::path(
    post,
    path = "/sync/retry",
    request_body = RetryRequest,
    responses(
        (status = 200, description = "Retry finished; `success` tells whether the order is synced", body = RetryResponse),
        (status = 400, description = "Unknown retry_type", body = ApiError),
        (status = 404, description = "Detail not found", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn retry_detail(
    State(state): State<AppState>,
    payload: Result<Json<RetryRequest>, JsonRejection>,
) -> Result<Json<RetryResponse>, ApiError> {
    let Json(request) = payload?;
    let scope: RetryScope = request.retry_type.parse()?;

    let result = state
        .controller
        .retry_coordinator()
        .retry_detail(request.detail_id, scope)
        .await?;

    Ok(Json(RetryResponse {
        success: result.success(),
        detail_id: result.detail.id,
        sync_status: result.detail.sync_status,
        retry_count: result.detail.retry_count,
        error_message: result.detail.error_message,
    }))
}

/// Retry every failed, partial or errored order of a run
#[utoipa::path(
    post,
    path = "/sync/runs/{id}/retry-failed",
    params(("id" = Uuid, Path, description = "Sync run id")),
    responses(
        (status = 200, description = "Aggregate retry counts", body = RetrySummary, example = json!({
            "attempted": 3,
            "succeeded": 2,
            "failed": 1
        })),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn retry_failed(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RetrySummary>, ApiError> {
    let summary = state
        .controller
        .retry_coordinator()
        .retry_failed(run_id)
        .await?;
    Ok(Json(summary))
}
