//! Best-effort completion summary for the job owner.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::prelude::*;
use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};

use crate::mail::{CompletionSummary, MailTransport, OutgoingMail};
use crate::models::sync_job::{self, JobStatus};
use crate::models::{MailCredential, SyncJob};

/// Outcome of a notification attempt; never an error for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Mail disabled, owner without credentials, or job not completed
    NotApplicable,
    Failed,
}

#[derive(Clone)]
pub struct Notifier {
    transport: Option<Arc<dyn MailTransport>>,
}

impl Notifier {
    pub fn new(transport: Option<Arc<dyn MailTransport>>) -> Self {
        Self { transport }
    }

    pub fn disabled() -> Self {
        Self { transport: None }
    }

    /// Sends the summary for a completed job and sets `email_sent`.
    pub async fn notify_completion(
        &self,
        db: &DatabaseConnection,
        job: &sync_job::Model,
    ) -> NotifyOutcome {
        let outcome = self.deliver(db, job).await;
        counter!("order_sync_notifications_total", "outcome" => match outcome {
            NotifyOutcome::Sent => "sent",
            NotifyOutcome::NotApplicable => "skipped",
            NotifyOutcome::Failed => "failed",
        })
        .increment(1);
        outcome
    }

    async fn deliver(&self, db: &DatabaseConnection, job: &sync_job::Model) -> NotifyOutcome {
        let Some(transport) = &self.transport else {
            return NotifyOutcome::NotApplicable;
        };
        if job.job_status() != Some(JobStatus::Completed) || job.email_sent {
            return NotifyOutcome::NotApplicable;
        }

        let credential = match MailCredential::find_by_id(job.owner_id.clone()).one(db).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!(job_id = %job.id, owner_id = %job.owner_id, "Owner has no mail credentials");
                return NotifyOutcome::NotApplicable;
            }
            Err(e) => {
                warn!(job_id = %job.id, "Failed to load mail credentials: {}", e);
                return NotifyOutcome::Failed;
            }
        };

        let summary = summarize(job);
        let mail = OutgoingMail::completion(&credential.sender_address, &job.owner_email, &summary);

        if let Err(e) = transport.send(&credential.api_token, &mail).await {
            warn!(job_id = %job.id, "Completion summary not delivered: {}", e);
            return NotifyOutcome::Failed;
        }

        let flagged = SyncJob::update_many()
            .col_expr(sync_job::Column::EmailSent, Expr::value(true))
            .filter(sync_job::Column::Id.eq(job.id))
            .exec(db)
            .await;
        if let Err(e) = flagged {
            warn!(job_id = %job.id, "Summary sent but email_sent not recorded: {}", e);
        }

        info!(job_id = %job.id, to = %job.owner_email, "Completion summary sent");
        NotifyOutcome::Sent
    }
}

fn summarize(job: &sync_job::Model) -> CompletionSummary {
    let started = job.started_at.unwrap_or(job.created_at);
    let finished = job.completed_at.unwrap_or_else(|| Utc::now().fixed_offset());

    CompletionSummary {
        owner_name: job.owner_name.clone(),
        from_date: job.from_date,
        to_date: job.to_date,
        total_orders: job.total_orders,
        successful_orders: job.successful_orders,
        failed_orders: job.failed_orders,
        skipped_orders: job.skipped_orders,
        duration_seconds: (finished - started).num_seconds(),
    }
}
