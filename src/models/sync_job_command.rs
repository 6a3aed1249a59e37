//! SyncJobCommand entity model
//!
//! Control requests (pause, cancel) addressed to a running job.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_job_commands")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub job_id: Uuid,
    /// `pause` or `cancel`
    pub command: String,
    pub created_at: DateTimeWithTimeZone,
    /// Set once the worker has acted on the command
    pub consumed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_job::Entity",
        from = "Column::JobId",
        to = "super::sync_job::Column::Id"
    )]
    SyncJob,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Control requests a running job observes between orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Pause,
    Cancel,
}

impl JobCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommand::Pause => "pause",
            JobCommand::Cancel => "cancel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pause" => Some(JobCommand::Pause),
            "cancel" => Some(JobCommand::Cancel),
            _ => None,
        }
    }
}
