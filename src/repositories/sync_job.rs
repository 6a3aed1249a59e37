//! # SyncJob Repository
//!
//! Repository operations for the sync_jobs table and its command channel.
//! Transitions on jobs the worker does not own are guarded conditional
//! UPDATEs; requests against a running job are queued as commands instead.

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::prelude::*;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::time::Duration;
use uuid::Uuid;

use crate::error::SyncEngineError;
use crate::models::sync_job::{ActiveModel, Column, Entity, JobStatus, Model};
use crate::models::sync_job_command::{
    self, ActiveModel as CommandActiveModel, Entity as CommandEntity, JobCommand,
};
use crate::sync::window::SyncWindow;

/// Input for a new order sync job.
#[derive(Debug, Clone)]
pub struct NewSyncJob {
    /// Caller-chosen id; generated when absent
    pub id: Option<Uuid>,
    pub window: SyncWindow,
    pub owner_id: String,
    pub owner_email: String,
    pub owner_name: String,
}

/// What a pause/cancel request did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The job row was transitioned directly
    Applied(JobStatus),
    /// The job is running; the worker will act on the queued command
    Queued(JobCommand),
    /// The job was already in the requested state
    Unchanged(JobStatus),
}

/// Repository for sync job database operations
#[derive(Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a `pending` job for the worker to pick up
    pub async fn create(&self, input: NewSyncJob) -> Result<Model, SyncEngineError> {
        let now = Utc::now().fixed_offset();

        let job = ActiveModel {
            id: Set(input.id.unwrap_or_else(Uuid::new_v4)),
            job_type: Set("order_sync".to_string()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            from_date: Set(input.window.from_date),
            to_date: Set(input.window.to_date),
            from_date_int: Set(input.window.from_int()),
            to_date_int: Set(input.window.to_int()),
            owner_id: Set(input.owner_id),
            owner_email: Set(input.owner_email),
            owner_name: Set(input.owner_name),
            total_orders: Set(0),
            processed_orders: Set(0),
            successful_orders: Set(0),
            failed_orders: Set(0),
            skipped_orders: Set(0),
            current_order_number: Set(None),
            last_order_number: Set(None),
            run_id: Set(None),
            lease_token: Set(None),
            error_message: Set(None),
            email_sent: Set(false),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };

        let result = job.insert(&self.db).await.map_err(|e| {
            tracing::error!("Failed to create sync job: {}", e);
            SyncEngineError::from(e)
        })?;

        tracing::info!(
            job_id = %result.id,
            owner_id = %result.owner_id,
            from_date = %result.from_date,
            to_date = %result.to_date,
            "Sync job enqueued"
        );

        Ok(result)
    }

    /// Find a sync job by ID
    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, SyncEngineError> {
        Ok(Entity::find_by_id(job_id).one(&self.db).await?)
    }

    /// Find a sync job by ID, failing when it does not exist
    pub async fn get(&self, job_id: Uuid) -> Result<Model, SyncEngineError> {
        self.find(job_id)
            .await?
            .ok_or_else(|| SyncEngineError::not_found("sync job", job_id))
    }

    /// Request a cooperative pause.
    pub async fn pause(&self, job_id: Uuid) -> Result<ControlOutcome, SyncEngineError> {
        // A guarded update can lose the race against the worker claiming the
        // job; the next pass then sees `running` and queues a command.
        for _ in 0..3 {
            let job = self.get(job_id).await?;
            let status = current_status(&job)?;

            match status {
                JobStatus::Pending => {
                    if self
                        .transition(job_id, &[JobStatus::Pending], JobStatus::Paused, false)
                        .await?
                    {
                        tracing::info!(job_id = %job_id, "Pending sync job paused");
                        return Ok(ControlOutcome::Applied(JobStatus::Paused));
                    }
                }
                JobStatus::Running => {
                    if self.queue_for_running(job_id, JobCommand::Pause).await? {
                        return Ok(ControlOutcome::Queued(JobCommand::Pause));
                    }
                }
                JobStatus::Paused => return Ok(ControlOutcome::Unchanged(JobStatus::Paused)),
                terminal => {
                    return Err(SyncEngineError::invalid_state(job_id, terminal.as_str(), "pause"));
                }
            }
        }

        let job = self.get(job_id).await?;
        Err(SyncEngineError::invalid_state(job_id, job.status, "pause"))
    }

    /// Request cancellation. Cancel dominates a pending pause.
    pub async fn cancel(&self, job_id: Uuid) -> Result<ControlOutcome, SyncEngineError> {
        for _ in 0..3 {
            let job = self.get(job_id).await?;
            let status = current_status(&job)?;

            match status {
                JobStatus::Pending | JobStatus::Paused => {
                    if self
                        .transition(
                            job_id,
                            &[JobStatus::Pending, JobStatus::Paused],
                            JobStatus::Cancelled,
                            true,
                        )
                        .await?
                    {
                        if let Some(run_id) = job.run_id {
                            crate::sync::recorder::RunRecorder::close_run(
                                &self.db,
                                run_id,
                                JobStatus::Cancelled,
                            )
                            .await?;
                        }
                        tracing::info!(job_id = %job_id, "Sync job cancelled before running");
                        return Ok(ControlOutcome::Applied(JobStatus::Cancelled));
                    }
                }
                JobStatus::Running => {
                    if self.queue_for_running(job_id, JobCommand::Cancel).await? {
                        return Ok(ControlOutcome::Queued(JobCommand::Cancel));
                    }
                }
                JobStatus::Cancelled => {
                    return Ok(ControlOutcome::Unchanged(JobStatus::Cancelled));
                }
                terminal => {
                    return Err(SyncEngineError::invalid_state(job_id, terminal.as_str(), "cancel"));
                }
            }
        }

        let job = self.get(job_id).await?;
        Err(SyncEngineError::invalid_state(job_id, job.status, "cancel"))
    }

    /// Requeue a paused job, or a running job whose heartbeat is older than
    /// `stale_after`, so the worker continues it from its checkpoint.
    pub async fn resume(
        &self,
        job_id: Uuid,
        resume_from: Option<i32>,
        stale_after: Duration,
    ) -> Result<Model, SyncEngineError> {
        let job = self.get(job_id).await?;
        let status = current_status(&job)?;

        if let Some(ordinal) = resume_from
            && ordinal != job.processed_orders
        {
            tracing::warn!(
                job_id = %job_id,
                resume_from = ordinal,
                processed_orders = job.processed_orders,
                "resume_from does not match the persisted checkpoint; continuing from the checkpoint"
            );
        }

        let requeued = match status {
            JobStatus::Pending => return Ok(job),
            JobStatus::Paused => {
                self.transition(job_id, &[JobStatus::Paused], JobStatus::Pending, false)
                    .await?
            }
            JobStatus::Running => {
                let stale_after = ChronoDuration::from_std(stale_after)
                    .unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
                let heartbeat_age = Utc::now().fixed_offset() - job.updated_at;
                if heartbeat_age < stale_after {
                    return Err(SyncEngineError::invalid_state(
                        job_id,
                        "running (heartbeat is fresh)",
                        "resume",
                    ));
                }

                // Compare-and-swap on the heartbeat so a live worker wins
                let result = Entity::update_many()
                    .col_expr(Column::Status, Expr::value(JobStatus::Pending.as_str()))
                    .col_expr(Column::LeaseToken, Expr::value(Option::<Uuid>::None))
                    .col_expr(Column::CurrentOrderNumber, Expr::value(Option::<String>::None))
                    .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
                    .filter(Column::Id.eq(job_id))
                    .filter(Column::Status.eq(JobStatus::Running.as_str()))
                    .filter(Column::UpdatedAt.eq(job.updated_at))
                    .exec(&self.db)
                    .await?;
                if result.rows_affected == 1 {
                    tracing::warn!(job_id = %job_id, "Requeued sync job with stale heartbeat");
                }
                result.rows_affected == 1
            }
            other => {
                return Err(SyncEngineError::invalid_state(job_id, other.as_str(), "resume"));
            }
        };

        if !requeued {
            let job = self.get(job_id).await?;
            return Err(SyncEngineError::invalid_state(job_id, job.status, "resume"));
        }

        // Requests addressed to the previous execution no longer apply
        self.consume_commands(&self.db, job_id).await?;

        tracing::info!(job_id = %job_id, "Sync job requeued for resume");
        self.get(job_id).await
    }

    /// Atomically move up to `limit` pending jobs to `running` under a fresh lease.
    pub async fn claim_pending(&self, limit: u64) -> Result<Vec<Model>, SyncEngineError> {
        let lease = Uuid::new_v4();
        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let eligible = Entity::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .order_by_asc(Column::CreatedAt)
            .limit(Some(limit))
            .into_tuple::<Uuid>()
            .all(&txn)
            .await?;

        if eligible.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(Column::LeaseToken, Expr::value(lease))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(eligible))
            .filter(Column::Status.eq(JobStatus::Pending.as_str())) // still pending
            .exec(&txn)
            .await?;

        let claimed = Entity::find()
            .filter(Column::LeaseToken.eq(lease))
            .order_by_asc(Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;
        Ok(claimed)
    }

    /// Claim one specific pending job.
    pub async fn claim(&self, job_id: Uuid) -> Result<Model, SyncEngineError> {
        let lease = Uuid::new_v4();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(Column::LeaseToken, Expr::value(lease))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            let job = self.get(job_id).await?;
            return Err(SyncEngineError::invalid_state(job_id, job.status, "execute"));
        }

        self.get(job_id).await
    }

    /// Queues `command` and makes sure a worker will see it. Returns false
    /// when the job left `running` before the command could be observed; the
    /// command is then withdrawn so the caller can apply it directly.
    async fn queue_for_running(
        &self,
        job_id: Uuid,
        command: JobCommand,
    ) -> Result<bool, SyncEngineError> {
        let command_id = self.enqueue_command(job_id, command).await?;

        let job = self.get(job_id).await?;
        if job.job_status() == Some(JobStatus::Running) {
            return Ok(true);
        }

        // Consumed already means the worker acted on it before stopping
        let withdrawn = CommandEntity::update_many()
            .col_expr(
                sync_job_command::Column::ConsumedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sync_job_command::Column::Id.eq(command_id))
            .filter(sync_job_command::Column::ConsumedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(withdrawn.rows_affected == 0)
    }

    /// Queue a control command for a running job
    pub async fn enqueue_command(
        &self,
        job_id: Uuid,
        command: JobCommand,
    ) -> Result<Uuid, SyncEngineError> {
        let command_id = Uuid::new_v4();
        CommandActiveModel {
            id: Set(command_id),
            job_id: Set(job_id),
            command: Set(command.as_str().to_string()),
            created_at: Set(Utc::now().fixed_offset()),
            consumed_at: Set(None),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            job_id = %job_id,
            command = command.as_str(),
            "Queued command for running job"
        );
        Ok(command_id)
    }

    /// Whether any unconsumed command is waiting, without consuming it.
    pub async fn has_pending_command(&self, job_id: Uuid) -> Result<bool, SyncEngineError> {
        let count = CommandEntity::find()
            .filter(sync_job_command::Column::JobId.eq(job_id))
            .filter(sync_job_command::Column::ConsumedAt.is_null())
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    /// Refreshes the heartbeat of a job held under `lease`. False once the
    /// lease is gone (the job was requeued and possibly claimed elsewhere).
    pub async fn heartbeat<C: ConnectionTrait>(
        &self,
        db: &C,
        job_id: Uuid,
        lease: Uuid,
    ) -> Result<bool, SyncEngineError> {
        let result = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::LeaseToken.eq(lease))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Consume the outstanding commands of a job held under `lease` and
    /// return the one that wins: cancel over pause. Only the commands read
    /// here are consumed; one queued concurrently stays for the next poll.
    pub async fn take_command(
        &self,
        job_id: Uuid,
        lease: Uuid,
    ) -> Result<Option<JobCommand>, SyncEngineError> {
        let txn = self.db.begin().await?;

        if !self.heartbeat(&txn, job_id, lease).await? {
            return Err(SyncEngineError::LeaseLost { job_id });
        }

        let pending = CommandEntity::find()
            .select_only()
            .column(sync_job_command::Column::Id)
            .column(sync_job_command::Column::Command)
            .filter(sync_job_command::Column::JobId.eq(job_id))
            .filter(sync_job_command::Column::ConsumedAt.is_null())
            .into_tuple::<(Uuid, String)>()
            .all(&txn)
            .await?;

        if pending.is_empty() {
            txn.commit().await?;
            return Ok(None);
        }

        CommandEntity::update_many()
            .col_expr(
                sync_job_command::Column::ConsumedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sync_job_command::Column::Id.is_in(pending.iter().map(|(id, _)| *id)))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        let commands: Vec<JobCommand> = pending
            .iter()
            .filter_map(|(_, command)| JobCommand::parse(command))
            .collect();
        if commands.contains(&JobCommand::Cancel) {
            Ok(Some(JobCommand::Cancel))
        } else if commands.contains(&JobCommand::Pause) {
            Ok(Some(JobCommand::Pause))
        } else {
            Ok(None)
        }
    }

    /// Mark every outstanding command of the job as consumed
    pub async fn consume_commands<C: ConnectionTrait>(
        &self,
        db: &C,
        job_id: Uuid,
    ) -> Result<u64, SyncEngineError> {
        let result = CommandEntity::update_many()
            .col_expr(
                sync_job_command::Column::ConsumedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sync_job_command::Column::JobId.eq(job_id))
            .filter(sync_job_command::Column::ConsumedAt.is_null())
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Guarded `from → to` transition for a job the worker does not own.
    async fn transition(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        completes: bool,
    ) -> Result<bool, SyncEngineError> {
        let now = Utc::now().fixed_offset();
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::UpdatedAt, Expr::value(now));
        if completes {
            update = update.col_expr(Column::CompletedAt, Expr::value(now));
        }

        let result = update
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in(from.iter().map(|s| s.as_str())))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}

fn current_status(job: &Model) -> Result<JobStatus, SyncEngineError> {
    job.job_status()
        .ok_or_else(|| SyncEngineError::invalid_state(job.id, job.status.clone(), "control"))
}
