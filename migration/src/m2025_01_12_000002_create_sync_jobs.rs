//! Migration to create the sync_jobs table.
//!
//! This migration creates the sync_jobs table which doubles as the durable task
//! queue consumed by the sync worker: `pending` rows are claimed, executed, and
//! carry their progress counters and checkpoint alongside the status.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(SyncJobs::JobType)
                            .text()
                            .not_null()
                            .default("order_sync"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncJobs::FromDate).date().not_null())
                    .col(ColumnDef::new(SyncJobs::ToDate).date().not_null())
                    .col(ColumnDef::new(SyncJobs::FromDateInt).integer().not_null())
                    .col(ColumnDef::new(SyncJobs::ToDateInt).integer().not_null())
                    .col(ColumnDef::new(SyncJobs::OwnerId).text().not_null())
                    .col(ColumnDef::new(SyncJobs::OwnerEmail).text().not_null())
                    .col(ColumnDef::new(SyncJobs::OwnerName).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::TotalOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ProcessedOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::SuccessfulOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FailedOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::SkippedOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::CurrentOrderNumber).text().null())
                    .col(ColumnDef::new(SyncJobs::LastOrderNumber).text().null())
                    .col(ColumnDef::new(SyncJobs::RunId).uuid().null())
                    .col(ColumnDef::new(SyncJobs::LeaseToken).uuid().null())
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::EmailSent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_run_id")
                            .from(SyncJobs::Table, SyncJobs::RunId)
                            .to(SyncRuns::Table, SyncRuns::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Worker claims pending jobs oldest-first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_sync_jobs_status_created ON sync_jobs (status, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_owner_window")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::OwnerId)
                    .col(SyncJobs::FromDateInt)
                    .col(SyncJobs::ToDateInt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_status_created").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_jobs_owner_window").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    JobType,
    Status,
    FromDate,
    ToDate,
    FromDateInt,
    ToDateInt,
    OwnerId,
    OwnerEmail,
    OwnerName,
    TotalOrders,
    ProcessedOrders,
    SuccessfulOrders,
    FailedOrders,
    SkippedOrders,
    CurrentOrderNumber,
    LastOrderNumber,
    RunId,
    LeaseToken,
    ErrorMessage,
    EmailSent,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
}
