//! Audit trail persistence: the run summary, one detail row per order, and
//! the job counters that move with them.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::prelude::*;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::{OrderAggregate, OrderAggregator};
use super::pipeline::OrderOutcome;
use super::step::{StepStates, StepStatus, SyncStatus};
use crate::error::SyncEngineError;
use crate::models::sync_job::{self, JobStatus};
use crate::models::{SyncJob, SyncRun, SyncRunDetail};
use crate::models::{sync_run, sync_run_detail};

/// Progress counters shared by a job and its run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Progress {
    pub total: i32,
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub skipped: i32,
}

impl Progress {
    pub fn from_job(job: &sync_job::Model) -> Self {
        Self {
            total: job.total_orders,
            processed: job.processed_orders,
            successful: job.successful_orders,
            failed: job.failed_orders,
            skipped: job.skipped_orders,
        }
    }

    pub fn record(&mut self, success: bool) {
        self.processed += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Orders that may still be attempted under the fixed total.
    pub fn remaining(&self) -> usize {
        usize::try_from(self.total - self.processed).unwrap_or(0)
    }
}

/// A running job and the lease token it was claimed under. Every write the
/// executing worker makes to the job row is guarded by the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLease {
    pub job_id: Uuid,
    pub token: Uuid,
}

impl JobLease {
    pub fn of(job: &sync_job::Model) -> Option<Self> {
        job.lease_token.map(|token| Self {
            job_id: job.id,
            token,
        })
    }

    /// Zero rows touched by a guarded update means another execution owns the job.
    fn held(&self, rows_affected: u64) -> Result<(), SyncEngineError> {
        if rows_affected == 0 {
            Err(SyncEngineError::LeaseLost {
                job_id: self.job_id,
            })
        } else {
            Ok(())
        }
    }
}

/// Writes runs, details and counters.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    aggregator: OrderAggregator,
}

impl RunRecorder {
    pub fn new(aggregator: OrderAggregator) -> Self {
        Self { aggregator }
    }

    /// The run this job reports into: the one bound on its first execution,
    /// else a new one. The flag is true when the run was created.
    pub async fn open_run<C: ConnectionTrait>(
        &self,
        db: &C,
        job: &sync_job::Model,
    ) -> Result<(sync_run::Model, bool), DbErr> {
        if let Some(run_id) = job.run_id
            && let Some(run) = SyncRun::find_by_id(run_id).one(db).await?
        {
            return Ok((run, false));
        }

        let run = sync_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            from_date: Set(job.from_date),
            to_date: Set(job.to_date),
            start_time: Set(Utc::now().fixed_offset()),
            end_time: Set(None),
            total_orders: Set(0),
            successful_orders: Set(0),
            failed_orders: Set(0),
            skipped_orders: Set(0),
            status: Set(JobStatus::Running.as_str().to_string()),
            created_by: Set(job.owner_id.clone()),
        }
        .insert(db)
        .await?;

        Ok((run, true))
    }

    /// Binds the job to its run and persists the (possibly new) totals.
    pub async fn attach_run(
        &self,
        db: &DatabaseConnection,
        job: &sync_job::Model,
        lease: JobLease,
        run_id: Uuid,
        progress: &Progress,
    ) -> Result<(), SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let txn = db.begin().await?;

        let mut update = SyncJob::update_many()
            .col_expr(sync_job::Column::RunId, Expr::value(run_id))
            .col_expr(sync_job::Column::TotalOrders, Expr::value(progress.total))
            .col_expr(sync_job::Column::SkippedOrders, Expr::value(progress.skipped))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now));
        if job.started_at.is_none() {
            update = update.col_expr(sync_job::Column::StartedAt, Expr::value(now));
        }
        let result = update
            .filter(sync_job::Column::Id.eq(lease.job_id))
            .filter(sync_job::Column::LeaseToken.eq(lease.token))
            .exec(&txn)
            .await?;
        lease.held(result.rows_affected)?;

        SyncRun::update_many()
            .col_expr(sync_run::Column::TotalOrders, Expr::value(progress.total))
            .col_expr(sync_run::Column::SkippedOrders, Expr::value(progress.skipped))
            .col_expr(
                sync_run::Column::Status,
                Expr::value(JobStatus::Running.as_str()),
            )
            .filter(sync_run::Column::Id.eq(run_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Order numbers that already have a detail row in the run.
    pub async fn attempted_orders<C: ConnectionTrait>(
        &self,
        db: &C,
        run_id: Uuid,
    ) -> Result<HashSet<String>, DbErr> {
        let numbers = SyncRunDetail::find()
            .select_only()
            .column(sync_run_detail::Column::OrderNumber)
            .filter(sync_run_detail::Column::RunId.eq(run_id))
            .into_tuple::<String>()
            .all(db)
            .await?;
        Ok(numbers.into_iter().collect())
    }

    /// Publishes the order in flight and bumps the heartbeat.
    pub async fn mark_in_flight<C: ConnectionTrait>(
        &self,
        db: &C,
        lease: JobLease,
        order_number: &str,
    ) -> Result<(), SyncEngineError> {
        let result = SyncJob::update_many()
            .col_expr(
                sync_job::Column::CurrentOrderNumber,
                Expr::value(order_number),
            )
            .col_expr(
                sync_job::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sync_job::Column::Id.eq(lease.job_id))
            .filter(sync_job::Column::LeaseToken.eq(lease.token))
            .exec(db)
            .await?;
        lease.held(result.rows_affected)
    }

    /// Persists one order's outcome together with the job and run counters.
    /// Nothing is written unless the job is still held under `lease`.
    pub async fn record_order(
        &self,
        db: &DatabaseConnection,
        lease: JobLease,
        run_id: Uuid,
        order: &OrderAggregate,
        outcome: &OrderOutcome,
        progress: &Progress,
    ) -> Result<sync_run_detail::Model, SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let status = if outcome.is_success() {
            SyncStatus::Success
        } else {
            SyncStatus::Failed
        };

        let txn = db.begin().await?;

        let result = SyncJob::update_many()
            .col_expr(sync_job::Column::ProcessedOrders, Expr::value(progress.processed))
            .col_expr(sync_job::Column::SuccessfulOrders, Expr::value(progress.successful))
            .col_expr(sync_job::Column::FailedOrders, Expr::value(progress.failed))
            .col_expr(
                sync_job::Column::LastOrderNumber,
                Expr::value(order.order_number.as_str()),
            )
            .col_expr(
                sync_job::Column::CurrentOrderNumber,
                Expr::value(Option::<String>::None),
            )
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
            .filter(sync_job::Column::Id.eq(lease.job_id))
            .filter(sync_job::Column::LeaseToken.eq(lease.token))
            .exec(&txn)
            .await?;
        lease.held(result.rows_affected)?;

        let detail = sync_run_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(run_id),
            order_number: Set(order.order_number.clone()),
            order_date: Set(order.order_date),
            customer_phone: Set(order.customer_phone.clone()),
            product_names: Set(order.product_names()),
            total_amount: Set(order.total_amount()),
            sync_status: Set(status.as_str().to_string()),
            error_message: Set(outcome.error_message()),
            step_customer: Set(outcome.steps.customer.as_str().to_string()),
            step_brand: Set(outcome.steps.brand.as_str().to_string()),
            step_product: Set(outcome.steps.product.as_str().to_string()),
            step_order: Set(outcome.steps.order.as_str().to_string()),
            step_purchase: Set(outcome.steps.purchase.as_str().to_string()),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if outcome.steps.order == StepStatus::Sent {
            self.aggregator.mark_sent(&txn, order).await?;
        }

        // Run counters move by delta: a run may span several jobs
        let successful_delta = i32::from(status.is_success());
        SyncRun::update_many()
            .col_expr(
                sync_run::Column::SuccessfulOrders,
                Expr::col(sync_run::Column::SuccessfulOrders).add(successful_delta),
            )
            .col_expr(
                sync_run::Column::FailedOrders,
                Expr::col(sync_run::Column::FailedOrders).add(1 - successful_delta),
            )
            .filter(sync_run::Column::Id.eq(run_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(detail)
    }

    /// Moves job and run to `status`, persisting the final counters and
    /// releasing `lease`. A job no longer held under `lease` is left alone.
    pub async fn finish(
        &self,
        db: &DatabaseConnection,
        lease: JobLease,
        run_id: Option<Uuid>,
        status: JobStatus,
        progress: &Progress,
        error: Option<&str>,
    ) -> Result<(), SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let txn = db.begin().await?;

        let mut update = SyncJob::update_many()
            .col_expr(sync_job::Column::Status, Expr::value(status.as_str()))
            .col_expr(sync_job::Column::ProcessedOrders, Expr::value(progress.processed))
            .col_expr(sync_job::Column::SuccessfulOrders, Expr::value(progress.successful))
            .col_expr(sync_job::Column::FailedOrders, Expr::value(progress.failed))
            .col_expr(
                sync_job::Column::CurrentOrderNumber,
                Expr::value(Option::<String>::None),
            )
            .col_expr(sync_job::Column::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now));
        if status.is_terminal() {
            update = update.col_expr(sync_job::Column::CompletedAt, Expr::value(now));
        }
        if let Some(message) = error {
            update = update.col_expr(sync_job::Column::ErrorMessage, Expr::value(message));
        }
        let result = update
            .filter(sync_job::Column::Id.eq(lease.job_id))
            .filter(sync_job::Column::LeaseToken.eq(lease.token))
            .exec(&txn)
            .await?;
        lease.held(result.rows_affected)?;

        if let Some(run_id) = run_id {
            Self::close_run(&txn, run_id, status).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Mirrors a job status onto its run; terminal states stamp `end_time`.
    pub async fn close_run<C: ConnectionTrait>(
        db: &C,
        run_id: Uuid,
        status: JobStatus,
    ) -> Result<(), DbErr> {
        let mut update = SyncRun::update_many()
            .col_expr(sync_run::Column::Status, Expr::value(status.as_str()));
        if status.is_terminal() {
            update = update.col_expr(
                sync_run::Column::EndTime,
                Expr::value(Utc::now().fixed_offset()),
            );
        }
        update
            .filter(sync_run::Column::Id.eq(run_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Overwrites a detail row after a retry and keeps the run counters in
    /// step with the success/non-success transition.
    pub async fn save_retry(
        &self,
        db: &DatabaseConnection,
        detail: &sync_run_detail::Model,
        order: Option<&OrderAggregate>,
        steps: &StepStates,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<sync_run_detail::Model, DbErr> {
        let was_success = SyncStatus::parse_lossy(&detail.sync_status).is_success();
        let txn = db.begin().await?;

        let mut active: sync_run_detail::ActiveModel = detail.clone().into();
        active.sync_status = Set(status.as_str().to_string());
        active.error_message = Set(error);
        active.step_customer = Set(steps.customer.as_str().to_string());
        active.step_brand = Set(steps.brand.as_str().to_string());
        active.step_product = Set(steps.product.as_str().to_string());
        active.step_order = Set(steps.order.as_str().to_string());
        active.step_purchase = Set(steps.purchase.as_str().to_string());
        active.retry_count = Set(detail.retry_count + 1);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(&txn).await?;

        if let Some(order) = order
            && steps.order == StepStatus::Sent
        {
            self.aggregator.mark_sent(&txn, order).await?;
        }

        let delta = match (was_success, status.is_success()) {
            (false, true) => 1,
            (true, false) => -1,
            _ => 0,
        };
        if delta != 0 {
            SyncRun::update_many()
                .col_expr(
                    sync_run::Column::SuccessfulOrders,
                    Expr::col(sync_run::Column::SuccessfulOrders).add(delta),
                )
                .col_expr(
                    sync_run::Column::FailedOrders,
                    Expr::col(sync_run::Column::FailedOrders).sub(delta),
                )
                .filter(sync_run::Column::Id.eq(detail.run_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(updated)
    }
}

/// Reads the stored step fields of a detail row.
pub fn step_states(detail: &sync_run_detail::Model) -> StepStates {
    StepStates {
        customer: StepStatus::parse_lossy(&detail.step_customer),
        brand: StepStatus::parse_lossy(&detail.step_brand),
        product: StepStatus::parse_lossy(&detail.step_product),
        order: StepStatus::parse_lossy(&detail.step_order),
        purchase: StepStatus::parse_lossy(&detail.step_purchase),
    }
}
