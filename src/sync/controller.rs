//! Job lifecycle: start, execute, cooperative pause/cancel and resume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::OrderAggregator;
use super::classifier::FailureClassifier;
use super::notifier::Notifier;
use super::pipeline::{PipelineRunner, StepPolicy, StopCheck};
use super::recorder::{JobLease, Progress, RunRecorder};
use super::retry::RetryCoordinator;
use super::step::ErpGateway;
use super::window::SyncWindow;
use crate::config::{AppConfig, CancellationGranularity};
use crate::error::SyncEngineError;
use crate::models::sync_job::{self, JobStatus};
use crate::models::sync_job_command::JobCommand;
use crate::repositories::sync_job::{ControlOutcome, NewSyncJob, SyncJobRepository};
use crate::telemetry::{TraceContext, with_trace_context};

/// Where an execution of a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: Progress,
}

/// Owns the lifecycle of sync jobs.
#[derive(Clone)]
pub struct JobController {
    db: DatabaseConnection,
    jobs: SyncJobRepository,
    aggregator: OrderAggregator,
    recorder: RunRecorder,
    pipeline: PipelineRunner,
    classifier: FailureClassifier,
    notifier: Notifier,
    granularity: CancellationGranularity,
    stale_after: Duration,
}

impl JobController {
    pub fn new(
        db: DatabaseConnection,
        config: &AppConfig,
        erp: Arc<dyn ErpGateway>,
        notifier: Notifier,
    ) -> Self {
        let aggregator = OrderAggregator::new(&config.eligibility);
        Self {
            jobs: SyncJobRepository::new(db.clone()),
            recorder: RunRecorder::new(aggregator.clone()),
            pipeline: PipelineRunner::new(erp, StepPolicy::from_config(&config.worker)),
            classifier: FailureClassifier::new(&config.classifier),
            granularity: config.worker.cancellation_granularity,
            stale_after: Duration::from_secs(config.worker.stale_after_seconds),
            aggregator,
            notifier,
            db,
        }
    }

    pub fn jobs(&self) -> &SyncJobRepository {
        &self.jobs
    }

    /// A retry coordinator sharing this controller's pipeline and rules.
    pub fn retry_coordinator(&self) -> RetryCoordinator {
        RetryCoordinator::new(
            self.db.clone(),
            self.aggregator.clone(),
            self.pipeline.clone(),
            self.classifier.clone(),
        )
    }

    /// Enqueue a job; the worker picks it up.
    pub async fn start(&self, input: NewSyncJob) -> Result<sync_job::Model, SyncEngineError> {
        let job = self.jobs.create(input).await?;
        counter!("order_sync_jobs_total", "event" => "started").increment(1);
        Ok(job)
    }

    pub async fn pause(&self, job_id: Uuid) -> Result<ControlOutcome, SyncEngineError> {
        self.jobs.pause(job_id).await
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<ControlOutcome, SyncEngineError> {
        self.jobs.cancel(job_id).await
    }

    pub async fn resume(
        &self,
        job_id: Uuid,
        resume_from: Option<i32>,
    ) -> Result<sync_job::Model, SyncEngineError> {
        let job = self.jobs.resume(job_id, resume_from, self.stale_after).await?;
        counter!("order_sync_jobs_total", "event" => "resumed").increment(1);
        Ok(job)
    }

    /// Claims one pending job and runs it on the caller's task.
    pub async fn execute(&self, job_id: Uuid) -> Result<JobReport, SyncEngineError> {
        let job = self.jobs.claim(job_id).await?;
        self.run_claimed(job).await
    }

    /// Runs a job already claimed by this process until it completes, is
    /// paused or cancelled, or hits a fatal error.
    pub async fn run_claimed(&self, job: sync_job::Model) -> Result<JobReport, SyncEngineError> {
        with_trace_context(TraceContext::for_job(job.id), self.run_job(job)).await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, from_date = %job.from_date, to_date = %job.to_date))]
    async fn run_job(&self, job: sync_job::Model) -> Result<JobReport, SyncEngineError> {
        let timer = Instant::now();
        let job_id = job.id;
        let Some(lease) = JobLease::of(&job) else {
            return Err(SyncEngineError::invalid_state(job_id, job.status, "execute"));
        };
        let mut progress = Progress::from_job(&job);
        let mut run_id = job.run_id;

        info!(processed = progress.processed, "Sync job started");

        match self.process(&job, lease, &mut run_id, &mut progress).await {
            Ok(status) => {
                histogram!("order_sync_job_duration_seconds", "status" => status.as_str())
                    .record(timer.elapsed().as_secs_f64());
                counter!("order_sync_jobs_total", "event" => status.as_str()).increment(1);
                info!(
                    status = status.as_str(),
                    total = progress.total,
                    processed = progress.processed,
                    successful = progress.successful,
                    failed = progress.failed,
                    skipped = progress.skipped,
                    "Sync job stopped"
                );

                if status == JobStatus::Completed {
                    let finished = self.jobs.get(job_id).await?;
                    self.notifier.notify_completion(&self.db, &finished).await;
                }

                Ok(JobReport {
                    job_id,
                    status,
                    progress,
                })
            }
            Err(e @ SyncEngineError::LeaseLost { .. }) => {
                // The job row belongs to whoever holds the lease now
                warn!(processed = progress.processed, "Sync job stopped: {}", e);
                counter!("order_sync_jobs_total", "event" => "lease_lost").increment(1);
                Err(e)
            }
            Err(e) => {
                error!("Sync job failed: {}", e);
                let message = e.to_string();
                if let Err(finish_error) = self
                    .recorder
                    .finish(
                        &self.db,
                        lease,
                        run_id,
                        JobStatus::Failed,
                        &progress,
                        Some(&message),
                    )
                    .await
                {
                    error!("Could not record job failure: {}", finish_error);
                }
                histogram!("order_sync_job_duration_seconds", "status" => "failed")
                    .record(timer.elapsed().as_secs_f64());
                counter!("order_sync_jobs_total", "event" => "failed").increment(1);
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        job: &sync_job::Model,
        lease: JobLease,
        run_id: &mut Option<Uuid>,
        progress: &mut Progress,
    ) -> Result<JobStatus, SyncEngineError> {
        let window = SyncWindow::new(job.from_date, job.to_date)?;
        let (run, fresh) = self.recorder.open_run(&self.db, job).await?;
        *run_id = Some(run.id);

        let aggregated = self.aggregator.load_window(&self.db, &window).await?;
        if fresh {
            progress.total = i32::try_from(aggregated.orders.len()).unwrap_or(i32::MAX);
            progress.skipped = i32::try_from(aggregated.skipped.len()).unwrap_or(i32::MAX);
            for order_number in &aggregated.skipped {
                info!(%order_number, "Skipping order without customer phone");
            }
        }
        self.recorder
            .attach_run(&self.db, job, lease, run.id, progress)
            .await?;

        let attempted = self.recorder.attempted_orders(&self.db, run.id).await?;
        let unattempted: Vec<_> = aggregated
            .orders
            .into_iter()
            .filter(|order| !attempted.contains(&order.order_number))
            .collect();
        let budget = progress.remaining();
        if unattempted.len() > budget {
            info!(
                deferred = unattempted.len() - budget,
                "New eligible orders appeared since the job started; deferring them"
            );
        }

        let check = LeaseCheck {
            db: &self.db,
            jobs: &self.jobs,
            lease,
            watch_commands: self.granularity == CancellationGranularity::PerStep,
        };

        for order in unattempted.into_iter().take(budget) {
            if let Some(status) = self.observe_commands(lease, run.id, progress).await? {
                return Ok(status);
            }

            self.recorder
                .mark_in_flight(&self.db, lease, &order.order_number)
                .await?;

            let outcome = self.pipeline.run_order(&order, Some(&check)).await;

            progress.record(outcome.is_success());
            let detail = self
                .recorder
                .record_order(&self.db, lease, run.id, &order, &outcome, progress)
                .await?;

            counter!("order_sync_orders_total", "status" => detail.sync_status.clone())
                .increment(1);
            if let Some(message) = &detail.error_message {
                warn!(order_number = %order.order_number, "Order not synced: {}", message);
            }
        }

        // A stop requested while the last order was in flight still applies
        if let Some(status) = self.observe_commands(lease, run.id, progress).await? {
            return Ok(status);
        }

        self.recorder
            .finish(
                &self.db,
                lease,
                Some(run.id),
                JobStatus::Completed,
                progress,
                None,
            )
            .await?;
        Ok(JobStatus::Completed)
    }

    /// Cooperative stop point. Returns the status the job stopped in, if any.
    async fn observe_commands(
        &self,
        lease: JobLease,
        run_id: Uuid,
        progress: &Progress,
    ) -> Result<Option<JobStatus>, SyncEngineError> {
        let status = match self.jobs.take_command(lease.job_id, lease.token).await? {
            Some(JobCommand::Cancel) => JobStatus::Cancelled,
            Some(JobCommand::Pause) => JobStatus::Paused,
            None => return Ok(None),
        };

        self.recorder
            .finish(&self.db, lease, Some(run_id), status, progress, None)
            .await?;
        info!(status = status.as_str(), processed = progress.processed, "Stop request observed");
        Ok(Some(status))
    }
}

/// Runs between steps: refreshes the heartbeat, stops the order once the
/// lease is gone, and with per-step granularity also peeks at the command
/// channel without consuming anything.
struct LeaseCheck<'a> {
    db: &'a DatabaseConnection,
    jobs: &'a SyncJobRepository,
    lease: JobLease,
    watch_commands: bool,
}

#[async_trait]
impl StopCheck for LeaseCheck<'_> {
    async fn stop_requested(&self) -> bool {
        let job_id = self.lease.job_id;
        match self.jobs.heartbeat(self.db, job_id, self.lease.token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %job_id, "Lease lost mid-order; abandoning remaining steps");
                return true;
            }
            Err(e) => warn!(job_id = %job_id, "Heartbeat failed: {}", e),
        }

        if !self.watch_commands {
            return false;
        }
        match self.jobs.has_pending_command(job_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(job_id = %job_id, "Command check failed: {}", e);
                false
            }
        }
    }
}
