//! Database migrations for the order sync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_products;
mod m2025_01_10_000002_create_sale_transactions;
mod m2025_01_10_000003_create_mail_credentials;
mod m2025_01_12_000001_create_sync_runs;
mod m2025_01_12_000002_create_sync_jobs;
mod m2025_01_12_000003_create_sync_run_details;
mod m2025_01_15_000001_create_sync_job_commands;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_products::Migration),
            Box::new(m2025_01_10_000002_create_sale_transactions::Migration),
            Box::new(m2025_01_10_000003_create_mail_credentials::Migration),
            Box::new(m2025_01_12_000001_create_sync_runs::Migration),
            Box::new(m2025_01_12_000002_create_sync_jobs::Migration),
            Box::new(m2025_01_12_000003_create_sync_run_details::Migration),
            Box::new(m2025_01_15_000001_create_sync_job_commands::Migration),
        ]
    }
}
