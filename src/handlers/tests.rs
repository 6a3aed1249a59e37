//! # Tests for Handlers
//!
//! Router-level tests against an in-memory SQLite database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Json,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::handlers::root;
use crate::models::ServiceInfo;
use crate::server::{AppState, create_app};
use crate::sync::{
    ErpGateway, JobController, Notifier, OrderAggregate, OrderLine, RemoteRecord, StepError,
};

/// Gateway that finds everything; handler tests never reach the ERP.
struct StaticErp;

#[async_trait]
impl ErpGateway for StaticErp {
    async fn ensure_customer(&self, _order: &OrderAggregate) -> Result<RemoteRecord, StepError> {
        Ok(RemoteRecord::found(1))
    }

    async fn ensure_brand(&self, _brand_name: &str) -> Result<RemoteRecord, StepError> {
        Ok(RemoteRecord::found(2))
    }

    async fn ensure_product(
        &self,
        _line: &OrderLine,
        _brand_id: i64,
    ) -> Result<RemoteRecord, StepError> {
        Ok(RemoteRecord::found(3))
    }

    async fn ensure_order(
        &self,
        _order: &OrderAggregate,
        _customer_id: i64,
        _product_ids: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        Ok(RemoteRecord::created(4))
    }

    async fn ensure_purchase(
        &self,
        _order: &OrderAggregate,
        _product_ids: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        Ok(RemoteRecord::created(5))
    }
}

async fn test_app() -> Router {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect to in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");

    let config = Arc::new(AppConfig::default());
    let controller = JobController::new(
        db.clone(),
        &config,
        Arc::new(StaticErp),
        Notifier::disabled(),
    );
    create_app(AppState::new(config, db, controller))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn start_body() -> Value {
    json!({
        "from_date": "2024-05-01",
        "to_date": "2024-05-31",
        "owner_id": "owner-1",
        "owner_email": "owner@example.com",
        "owner_name": "Owner"
    })
}

async fn start_job(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/sync/jobs", Some(start_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    body["job_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "order-sync");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_service_info_default() {
    let info = ServiceInfo::default();
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["service"], "order-sync");
    assert!(json.get("version").is_some());
}

#[tokio::test]
async fn test_health_reports_database() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_start_job_then_fetch_it() {
    let app = test_app().await;
    let job_id = start_job(&app).await;

    let (status, body) = send(&app, "GET", &format!("/sync/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], job_id.as_str());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["from_date"], "2024-05-01");
    assert_eq!(body["to_date"], "2024-05-31");
    assert_eq!(body["processed_orders"], 0);
    assert_eq!(body["email_sent"], false);
}

#[tokio::test]
async fn test_start_job_with_caller_id_conflicts_on_reuse() {
    let app = test_app().await;
    let job_id = Uuid::new_v4();
    let mut body = start_body();
    body["job_id"] = json!(job_id);

    let (status, response) = send(&app, "POST", "/sync/jobs", Some(body.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["job_id"], job_id.to_string());

    let (status, _) = send(&app, "POST", "/sync/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_start_job_rejects_inverted_window() {
    let app = test_app().await;
    let mut body = start_body();
    body["from_date"] = json!("2024-06-01");

    let (status, response) = send(&app, "POST", "/sync/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "INVALID_WINDOW");
    assert!(response["trace_id"].is_string());
}

#[tokio::test]
async fn test_start_job_rejects_malformed_date_and_owner() {
    let app = test_app().await;

    let mut body = start_body();
    body["to_date"] = json!("31/05/2024");
    let (status, response) = send(&app, "POST", "/sync/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "INVALID_WINDOW");

    let mut body = start_body();
    body["owner_email"] = json!("not-an-email");
    let (status, response) = send(&app, "POST", "/sync/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "VALIDATION_FAILED");
    assert!(response["details"]["owner_email"].is_string());
}

#[tokio::test]
async fn test_start_job_requires_json_body() {
    let app = test_app().await;
    let (status, response) = send(&app, "POST", "/sync/jobs", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_pause_resume_cancel_lifecycle() {
    let app = test_app().await;
    let job_id = start_job(&app).await;

    let (status, body) = send(&app, "POST", &format!("/sync/jobs/{job_id}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");
    assert_eq!(body["queued"], false);

    // Pausing twice is a no-op
    let (status, body) = send(&app, "POST", &format!("/sync/jobs/{job_id}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sync/jobs/{job_id}/resume"),
        Some(json!({ "resume_from": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");

    let (status, body) = send(&app, "POST", &format!("/sync/jobs/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, "POST", &format!("/sync/jobs/{job_id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE");
    assert_eq!(body["details"]["status"], "cancelled");

    let (status, _) = send(&app, "POST", &format!("/sync/jobs/{job_id}/resume"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&app, "GET", &format!("/sync/jobs/{job_id}"), None).await;
    assert_eq!(body["status"], "cancelled");
    assert!(body["completed_at"].is_string());
}

#[tokio::test]
async fn test_unknown_job_and_run_return_not_found() {
    let app = test_app().await;
    let missing = Uuid::new_v4();

    let (status, body) = send(&app, "GET", &format!("/sync/jobs/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(&app, "POST", &format!("/sync/jobs/{missing}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/sync/runs/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", &format!("/sync/runs/{missing}/details"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/sync/runs/{missing}/retry-failed"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_rejects_unknown_type_and_missing_detail() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/sync/retry",
        Some(json!({ "detail_id": Uuid::new_v4(), "retry_type": "everything" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, body) = send(
        &app,
        "POST",
        "/sync/retry",
        Some(json!({ "detail_id": Uuid::new_v4(), "retry_type": "order" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_openapi_document_lists_sync_paths() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/sync/jobs",
        "/sync/jobs/{id}",
        "/sync/jobs/{id}/pause",
        "/sync/jobs/{id}/cancel",
        "/sync/jobs/{id}/resume",
        "/sync/runs/{id}/details",
        "/sync/retry",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
