//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! which represents one background execution of the order sync engine over a
//! date window, together with its progress counters and checkpoint.

use super::sync_run::Entity as SyncRun;
use chrono::NaiveDate;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// SyncJob entity representing one execution attempt over a date window
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Kind of job (currently always `order_sync`)
    pub job_type: String,

    /// Current status (pending, running, paused, cancelled, completed, failed)
    pub status: String,

    /// First calendar day of the window (inclusive)
    pub from_date: NaiveDate,

    /// Last calendar day of the window (inclusive)
    pub to_date: NaiveDate,

    /// `from_date` as a `YYYYMMDD` integer
    pub from_date_int: i32,

    /// `to_date` as a `YYYYMMDD` integer
    pub to_date_int: i32,

    /// Identifier of the user that started the job
    pub owner_id: String,

    /// Address the completion summary is sent to
    pub owner_email: String,

    /// Display name of the owner used in the completion summary
    pub owner_name: String,

    pub total_orders: i32,
    pub processed_orders: i32,
    pub successful_orders: i32,
    pub failed_orders: i32,
    pub skipped_orders: i32,

    /// Order currently in flight; observability only
    pub current_order_number: Option<String>,

    /// Last order whose outcome has been persisted
    pub last_order_number: Option<String>,

    /// Run this job reports into
    pub run_id: Option<Uuid>,

    /// Claim token of the worker executing the job
    pub lease_token: Option<Uuid>,

    /// Fatal error that aborted the job
    pub error_message: Option<String>,

    /// Whether the completion summary has been delivered
    pub email_sent: bool,

    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Heartbeat, bumped on every checkpoint
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "SyncRun",
        from = "Column::RunId",
        to = "super::sync_run::Column::Id"
    )]
    SyncRun,
}

impl Related<SyncRun> for Entity {
    fn to() -> RelationDef {
        Relation::SyncRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle states stored in `sync_jobs.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "cancelled" => Some(JobStatus::Cancelled),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Model {
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }
}
