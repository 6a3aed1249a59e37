//! Replays the pipeline for orders that did not fully sync.

use std::fmt;
use std::str::FromStr;

use metrics::counter;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::OrderAggregator;
use super::classifier::{FailureClass, FailureClassifier};
use super::pipeline::PipelineRunner;
use super::recorder::{RunRecorder, step_states};
use super::step::{Step, StepStates, StepStatus, SyncStatus};
use crate::error::SyncEngineError;
use crate::models::{SyncRun, SyncRunDetail, sync_run_detail};

/// What a retry re-executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// The whole pipeline from `customer`
    Full,
    /// One step plus the prerequisites it needs ids from
    Step(Step),
}

impl RetryScope {
    fn label(&self) -> &'static str {
        match self {
            RetryScope::Full => "all",
            RetryScope::Step(step) => step.as_str(),
        }
    }

    fn for_class(class: FailureClass) -> Self {
        match class {
            FailureClass::Order => RetryScope::Step(Step::Order),
            FailureClass::Purchase => RetryScope::Step(Step::Purchase),
            FailureClass::Both | FailureClass::Other | FailureClass::None => RetryScope::Full,
        }
    }
}

impl FromStr for RetryScope {
    type Err = SyncEngineError;

    /// `all`, or the name of a step (`order` and `purchase` being the usual ones).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "all" => Ok(RetryScope::Full),
            other => other.parse::<Step>().map(RetryScope::Step).map_err(|_| {
                SyncEngineError::InvalidRetry(format!("unknown retry_type '{value}'"))
            }),
        }
    }
}

impl fmt::Display for RetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of retrying one detail row.
#[derive(Debug, Clone)]
pub struct RetryResult {
    pub detail: sync_run_detail::Model,
    pub status: SyncStatus,
}

impl RetryResult {
    pub fn success(&self) -> bool {
        self.status.is_success()
    }
}

/// Aggregate result of retrying every failed order of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RetrySummary {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Clone)]
pub struct RetryCoordinator {
    db: DatabaseConnection,
    aggregator: OrderAggregator,
    pipeline: PipelineRunner,
    recorder: RunRecorder,
    classifier: FailureClassifier,
}

impl RetryCoordinator {
    pub fn new(
        db: DatabaseConnection,
        aggregator: OrderAggregator,
        pipeline: PipelineRunner,
        classifier: FailureClassifier,
    ) -> Self {
        let recorder = RunRecorder::new(aggregator.clone());
        Self {
            db,
            aggregator,
            pipeline,
            recorder,
            classifier,
        }
    }

    /// Retries one detail row synchronously and overwrites it in place.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn retry_detail(
        &self,
        detail_id: Uuid,
        scope: RetryScope,
    ) -> Result<RetryResult, SyncEngineError> {
        let detail = SyncRunDetail::find_by_id(detail_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SyncEngineError::not_found("sync run detail", detail_id))?;

        let Some(order) = self
            .aggregator
            .load_order(&self.db, &detail.order_number)
            .await?
        else {
            warn!(order_number = %detail.order_number, "Order has no eligible lines left to retry");
            let updated = self
                .recorder
                .save_retry(
                    &self.db,
                    &detail,
                    None,
                    &step_states(&detail),
                    SyncStatus::Error,
                    Some(format!(
                        "order {} has no eligible transaction lines",
                        detail.order_number
                    )),
                )
                .await?;
            self.count(scope, SyncStatus::Error);
            return Ok(RetryResult {
                detail: updated,
                status: SyncStatus::Error,
            });
        };

        let outcome = match scope {
            RetryScope::Full => {
                self.pipeline
                    .run_steps(&order, &Step::ALL, StepStates::default(), None)
                    .await
            }
            RetryScope::Step(step) => {
                self.pipeline
                    .run_steps(&order, &step.with_prerequisites(), step_states(&detail), None)
                    .await
            }
        };

        let mut steps = outcome.steps;
        // Fail-fast leaves purchase pending even when it never applied
        if !order.has_non_stock_lines && steps.purchase == StepStatus::Pending {
            steps.purchase = StepStatus::Skipped;
        }

        let status = steps.sync_status();
        // A clean partial retry must not keep pointing at the step it just fixed
        let error = match outcome.error_message() {
            Some(message) => Some(message),
            None if status.is_success() => None,
            None if steps.any_failed() => detail.error_message.clone(),
            None => steps
                .first_pending()
                .map(|step| format!("{step} step still pending")),
        };

        let updated = self
            .recorder
            .save_retry(&self.db, &detail, Some(&order), &steps, status, error)
            .await?;

        self.count(scope, status);
        info!(
            order_number = %updated.order_number,
            status = status.as_str(),
            retry_count = updated.retry_count,
            "Retried order"
        );

        Ok(RetryResult {
            detail: updated,
            status,
        })
    }

    /// Retries every failed, partial or errored order of a run. Individual
    /// failures are counted, never raised.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, run_id: Uuid) -> Result<RetrySummary, SyncEngineError> {
        SyncRun::find_by_id(run_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SyncEngineError::not_found("sync run", run_id))?;

        let details = SyncRunDetail::find()
            .filter(sync_run_detail::Column::RunId.eq(run_id))
            .filter(sync_run_detail::Column::SyncStatus.is_in([
                SyncStatus::Failed.as_str(),
                SyncStatus::Partial.as_str(),
                SyncStatus::Error.as_str(),
            ]))
            .order_by_asc(sync_run_detail::Column::CreatedAt)
            .order_by_asc(sync_run_detail::Column::OrderNumber)
            .all(&self.db)
            .await?;

        let mut summary = RetrySummary::default();
        for detail in details {
            let scope = RetryScope::for_class(self.classifier.classify_detail(&detail));
            summary.attempted += 1;

            match self.retry_detail(detail.id, scope).await {
                Ok(result) if result.success() => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    warn!(detail_id = %detail.id, "Retry aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            run_id = %run_id,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Retried failed orders of run"
        );

        Ok(summary)
    }

    fn count(&self, scope: RetryScope, status: SyncStatus) {
        counter!(
            "order_sync_retries_total",
            "scope" => scope.label(),
            "outcome" => status.as_str()
        )
        .increment(1);
    }
}
