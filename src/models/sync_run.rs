//! SyncRun entity model
//!
//! A run is the audit aggregate for one sync window. It outlives individual
//! jobs so that a paused or interrupted job can be resumed into the same run.

use chrono::NaiveDate;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub start_time: DateTimeWithTimeZone,
    pub end_time: Option<DateTimeWithTimeZone>,
    pub total_orders: i32,
    pub successful_orders: i32,
    pub failed_orders: i32,
    pub skipped_orders: i32,
    /// Mirrors the owning job's status
    pub status: String,
    /// Owner id of the user that started the first job of this run
    pub created_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_run_detail::Entity")]
    SyncRunDetail,
}

impl Related<super::sync_run_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncRunDetail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
