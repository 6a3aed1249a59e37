//! SyncRunDetail entity model
//!
//! One row per order attempted within a run. Step columns hold the
//! `StepStatus` string of each pipeline step.

use chrono::NaiveDate;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_run_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub run_id: Uuid,
    pub order_number: String,
    pub order_date: NaiveDate,
    pub customer_phone: Option<String>,
    /// Distinct product names of the order joined with ", "
    pub product_names: String,
    #[sea_orm(column_type = "Double")]
    pub total_amount: f64,
    /// success, failed, partial or error
    pub sync_status: String,
    pub error_message: Option<String>,
    pub step_customer: String,
    pub step_brand: String,
    pub step_product: String,
    pub step_order: String,
    pub step_purchase: String,
    /// Number of times the retry coordinator re-entered this order
    pub retry_count: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_run::Entity",
        from = "Column::RunId",
        to = "super::sync_run::Column::Id"
    )]
    SyncRun,
}

impl Related<super::sync_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
