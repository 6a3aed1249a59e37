//! # Data Models
//!
//! This module contains the SeaORM entities read and written by the order
//! sync engine, plus the small response types shared by the API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod mail_credential;
pub mod product;
pub mod sale_transaction;
pub mod sync_job;
pub mod sync_job_command;
pub mod sync_run;
pub mod sync_run_detail;

pub use mail_credential::Entity as MailCredential;
pub use product::Entity as Product;
pub use sale_transaction::Entity as SaleTransaction;
pub use sync_job::Entity as SyncJob;
pub use sync_job_command::Entity as SyncJobCommand;
pub use sync_run::Entity as SyncRun;
pub use sync_run_detail::Entity as SyncRunDetail;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "order-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
