//! # Server Configuration
//!
//! This module contains the server setup and configuration for the order sync API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::sync::{FailureClassifier, JobController};
use crate::telemetry::{TraceContext, with_trace_context};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub controller: JobController,
    pub classifier: FailureClassifier,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, controller: JobController) -> Self {
        let classifier = FailureClassifier::new(&config.classifier);
        Self {
            config,
            db,
            controller,
            classifier,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/sync/jobs", post(handlers::jobs::start_job))
        .route("/sync/jobs/{id}", get(handlers::jobs::get_job))
        .route("/sync/jobs/{id}/pause", post(handlers::jobs::pause_job))
        .route("/sync/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        .route("/sync/jobs/{id}/resume", post(handlers::jobs::resume_job))
        .route("/sync/runs/{id}", get(handlers::runs::get_run))
        .route("/sync/runs/{id}/details", get(handlers::runs::list_run_details))
        .route("/sync/runs/{id}/retry-failed", post(handlers::runs::retry_failed))
        .route("/sync/retry", post(handlers::runs::retry_detail))
        .with_state(state)
        .layer(middleware::from_fn(request_trace_context))
        .layer(TraceLayer::new_for_http())
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Makes a per-request trace id available to `ApiError`.
async fn request_trace_context(request: Request, next: Next) -> Response {
    with_trace_context(TraceContext::for_request(), next.run(request)).await
}

/// Serves the API until `shutdown` fires
pub async fn run_server(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::jobs::start_job,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::pause_job,
        crate::handlers::jobs::cancel_job,
        crate::handlers::jobs::resume_job,
        crate::handlers::runs::get_run,
        crate::handlers::runs::list_run_details,
        crate::handlers::runs::retry_detail,
        crate::handlers::runs::retry_failed,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::jobs::StartJobRequest,
            crate::handlers::jobs::StartJobResponse,
            crate::handlers::jobs::ResumeJobRequest,
            crate::handlers::jobs::JobControlResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::runs::RunInfo,
            crate::handlers::runs::RunDetailInfo,
            crate::handlers::runs::RunDetailsResponse,
            crate::handlers::runs::RetryRequest,
            crate::handlers::runs::RetryResponse,
            crate::sync::FailureClass,
            crate::sync::RetrySummary,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Order sync job lifecycle"),
        (name = "runs", description = "Run audit trail and retries"),
    ),
    info(
        title = "Order Sync API",
        description = "Staged synchronization of sales orders into the ERP",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
