//! Detail-level and run-level retries.

mod test_utils;

use std::sync::Arc;

use order_sync::models::{
    Product, SaleTransaction, SyncRun, SyncRunDetail, product, sale_transaction, sync_run_detail,
};
use order_sync::sync::{JobController, RetryScope, RetrySummary, Step, StepError, SyncStatus};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use test_utils::*;
use uuid::Uuid;

async fn detail_of(db: &DatabaseConnection, run_id: Uuid, order_number: &str) -> sync_run_detail::Model {
    SyncRunDetail::find()
        .filter(sync_run_detail::Column::RunId.eq(run_id))
        .filter(sync_run_detail::Column::OrderNumber.eq(order_number))
        .order_by_asc(sync_run_detail::Column::CreatedAt)
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

async fn set_brand(db: &DatabaseConnection, sku: &str, brand: &str) {
    let mut active: product::ActiveModel = Product::find_by_id(sku.to_string())
        .one(db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.brand_name = Set(Some(brand.to_string()));
    active.update(db).await.unwrap();
}

/// Three orders where the middle one has a product without a brand.
async fn run_with_brand_failure() -> (DatabaseConnection, Arc<ScriptedErp>, JobController, Uuid) {
    let db = setup_test_db().await.unwrap();
    insert_product(&db, "SKU-A", Some("Acme"), None, false).await.unwrap();
    insert_product(&db, "SKU-NB", None, None, false).await.unwrap();
    SaleLine::new("SO-001", "2024-05-10", "SKU-A").insert(&db).await.unwrap();
    SaleLine::new("SO-002", "2024-05-10", "SKU-NB").insert(&db).await.unwrap();
    SaleLine::new("SO-003", "2024-05-10", "SKU-A").insert(&db).await.unwrap();

    let erp = ScriptedErp::new();
    let controller = controller(&db, &test_config(), erp.clone());
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();
    let run_id = controller.jobs().get(job.id).await.unwrap().run_id.unwrap();

    (db, erp, controller, run_id)
}

#[tokio::test]
async fn test_retry_order_after_fixing_brand() {
    let (db, erp, controller, run_id) = run_with_brand_failure().await;
    let failed = detail_of(&db, run_id, "SO-002").await;
    assert_eq!(failed.sync_status, "failed");

    set_brand(&db, "SKU-NB", "Beta").await;

    let result = controller
        .retry_coordinator()
        .retry_detail(failed.id, "order".parse::<RetryScope>().unwrap())
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.status, SyncStatus::Success);
    let detail = result.detail;
    assert_eq!(detail.id, failed.id);
    assert_eq!(detail.sync_status, "success");
    assert_eq!(detail.step_customer, "found");
    assert_eq!(detail.step_brand, "created");
    assert_eq!(detail.step_order, "sent");
    // Never ran, and there is nothing to purchase
    assert_eq!(detail.step_purchase, "skipped");
    assert_eq!(detail.retry_count, 1);
    assert!(detail.error_message.is_none());

    let run = SyncRun::find_by_id(run_id).one(&db).await.unwrap().unwrap();
    assert_eq!(run.successful_orders, 3);
    assert_eq!(run.failed_orders, 0);

    assert_eq!(erp.calls(Step::Order, "SO-002"), 1);
    let lines = SaleTransaction::find()
        .filter(sale_transaction::Column::OrderNumber.eq("SO-002"))
        .all(&db)
        .await
        .unwrap();
    assert!(lines.iter().all(|line| line.sent_to_erp));
}

#[tokio::test]
async fn test_retry_without_fix_keeps_failure_and_counts_attempt() {
    let (db, _erp, controller, run_id) = run_with_brand_failure().await;
    let failed = detail_of(&db, run_id, "SO-002").await;

    let coordinator = controller.retry_coordinator();
    let first = coordinator
        .retry_detail(failed.id, RetryScope::Full)
        .await
        .unwrap();
    assert!(!first.success());
    assert_eq!(first.detail.step_brand, "failed");
    assert_eq!(first.detail.retry_count, 1);
    assert!(first.detail.error_message.as_deref().unwrap().contains("no brand"));

    let second = coordinator
        .retry_detail(failed.id, RetryScope::Full)
        .await
        .unwrap();
    assert_eq!(second.detail.retry_count, 2);

    let run = SyncRun::find_by_id(run_id).one(&db).await.unwrap().unwrap();
    assert_eq!(run.successful_orders, 2);
    assert_eq!(run.failed_orders, 1);
}

#[tokio::test]
async fn test_retrying_a_synced_order_creates_nothing_new() {
    let (db, erp, controller, run_id) = run_with_brand_failure().await;
    let synced = detail_of(&db, run_id, "SO-001").await;
    let orders_before = erp.created(Step::Order);
    let customers_before = erp.created(Step::Customer);

    let result = controller
        .retry_coordinator()
        .retry_detail(synced.id, RetryScope::Full)
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.detail.step_customer, "found");
    assert_eq!(result.detail.step_brand, "found");
    assert_eq!(result.detail.step_product, "found");
    assert_eq!(erp.created(Step::Order), orders_before);
    assert_eq!(erp.created(Step::Customer), customers_before);

    // Success to success leaves the run counters alone
    let run = SyncRun::find_by_id(run_id).one(&db).await.unwrap().unwrap();
    assert_eq!(run.successful_orders, 2);
}

#[tokio::test]
async fn test_purchase_retry_after_supplier_outage() {
    let db = setup_test_db().await.unwrap();
    insert_product(&db, "NS-1", Some("Acme"), Some("Acme Supply"), true).await.unwrap();
    SaleLine::new("SO-001", "2024-05-10", "NS-1").insert(&db).await.unwrap();

    let erp = ScriptedErp::new();
    erp.fail(
        Step::Purchase,
        "SO-001",
        StepError::remote(Step::Purchase, "supplier is archived"),
    );
    let controller = controller(&db, &test_config(), erp.clone());
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();
    let run_id = controller.jobs().get(job.id).await.unwrap().run_id.unwrap();

    let failed = detail_of(&db, run_id, "SO-001").await;
    assert_eq!(failed.step_order, "sent");
    assert_eq!(failed.step_purchase, "failed");

    erp.clear_failures();
    let result = controller
        .retry_coordinator()
        .retry_detail(failed.id, "purchase".parse().unwrap())
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.detail.step_order, "sent");
    assert_eq!(result.detail.step_purchase, "sent");
    // The order step is not a purchase prerequisite and is not replayed
    assert_eq!(erp.calls(Step::Order, "SO-001"), 1);
    assert_eq!(erp.created(Step::Purchase), 1);
}

#[tokio::test]
async fn test_retry_of_vanished_order_is_an_error() {
    let (db, _erp, controller, run_id) = run_with_brand_failure().await;
    let failed = detail_of(&db, run_id, "SO-002").await;

    SaleTransaction::delete_many()
        .filter(sale_transaction::Column::OrderNumber.eq("SO-002"))
        .exec(&db)
        .await
        .unwrap();

    let result = controller
        .retry_coordinator()
        .retry_detail(failed.id, RetryScope::Full)
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::Error);
    assert_eq!(result.detail.sync_status, "error");
    assert_eq!(result.detail.retry_count, 1);
    assert!(result.detail.error_message.unwrap().contains("no eligible"));
}

#[tokio::test]
async fn test_retry_failed_reports_aggregate_counts() {
    let db = setup_test_db().await.unwrap();
    insert_product(&db, "SKU-A", Some("Acme"), None, false).await.unwrap();
    insert_product(&db, "SKU-NB", None, None, false).await.unwrap();
    seed_orders(&db, 2, "2024-05-10", "SKU-A").await.unwrap();
    SaleLine::new("SO-003", "2024-05-10", "SKU-NB").insert(&db).await.unwrap();

    let erp = ScriptedErp::new();
    erp.fail(
        Step::Order,
        "SO-001",
        StepError::remote(Step::Order, "order rejected"),
    );
    let controller = controller(&db, &test_config(), erp.clone());
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();
    let run_id = controller.jobs().get(job.id).await.unwrap().run_id.unwrap();

    // SO-001 recovers remotely; SO-003 still has no brand
    erp.clear_failures();
    let summary = controller
        .retry_coordinator()
        .retry_failed(run_id)
        .await
        .unwrap();

    assert_eq!(
        summary,
        RetrySummary {
            attempted: 2,
            succeeded: 1,
            failed: 1,
        }
    );
    assert_eq!(detail_of(&db, run_id, "SO-001").await.sync_status, "success");
    assert_eq!(detail_of(&db, run_id, "SO-003").await.sync_status, "failed");
    assert_eq!(detail_of(&db, run_id, "SO-002").await.retry_count, 0);

    let run = SyncRun::find_by_id(run_id).one(&db).await.unwrap().unwrap();
    assert_eq!(run.successful_orders, 2);
    assert_eq!(run.failed_orders, 1);
}

#[tokio::test]
async fn test_retry_failed_finishes_purchase_after_order_recovers() {
    let db = setup_test_db().await.unwrap();
    insert_product(&db, "NS-1", Some("Acme"), Some("Acme Supply"), true).await.unwrap();
    SaleLine::new("SO-001", "2024-05-10", "NS-1").insert(&db).await.unwrap();

    let erp = ScriptedErp::new();
    erp.fail(
        Step::Order,
        "SO-001",
        StepError::remote(Step::Order, "rejected by remote"),
    );
    let controller = controller(&db, &test_config(), erp.clone());
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();
    let run_id = controller.jobs().get(job.id).await.unwrap().run_id.unwrap();
    erp.clear_failures();

    // The order scope stops at the order step and leaves purchase for the next round
    let coordinator = controller.retry_coordinator();
    let first = coordinator.retry_failed(run_id).await.unwrap();
    assert_eq!(first.failed, 1);
    let partial = detail_of(&db, run_id, "SO-001").await;
    assert_eq!(partial.sync_status, "partial");
    assert_eq!(partial.step_order, "sent");
    assert_eq!(partial.step_purchase, "pending");
    assert_eq!(
        partial.error_message.as_deref(),
        Some("purchase step still pending")
    );

    let second = coordinator.retry_failed(run_id).await.unwrap();
    assert_eq!(
        second,
        RetrySummary {
            attempted: 1,
            succeeded: 1,
            failed: 0,
        }
    );
    let synced = detail_of(&db, run_id, "SO-001").await;
    assert_eq!(synced.sync_status, "success");
    assert_eq!(synced.step_purchase, "sent");
    assert!(synced.error_message.is_none());
    assert_eq!(synced.retry_count, 2);

    assert_eq!(erp.created(Step::Purchase), 1);
    assert_eq!(erp.calls(Step::Order, "SO-001"), 2);

    let run = SyncRun::find_by_id(run_id).one(&db).await.unwrap().unwrap();
    assert_eq!(run.successful_orders, 1);
    assert_eq!(run.failed_orders, 0);

    // Nothing left to retry
    assert_eq!(coordinator.retry_failed(run_id).await.unwrap().attempted, 0);
}
