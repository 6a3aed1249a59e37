//! SaleTransaction entity model
//!
//! Line-level sales records written by the point-of-sale module. The sync
//! engine reads eligible rows and flips `sent_to_erp` once the order exists
//! in the ERP.

use chrono::NaiveDate;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sale_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub transaction_date: NaiveDate,
    /// `transaction_date` as a `YYYYMMDD` integer
    pub date_int: i32,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub product_sku: String,
    pub product_name: String,
    pub brand_name: Option<String>,
    pub quantity: i32,
    #[sea_orm(column_type = "Double")]
    pub unit_price: f64,
    pub payment_method: String,
    pub is_deleted: bool,
    pub sent_to_erp: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
