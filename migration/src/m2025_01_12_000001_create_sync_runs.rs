//! Migration to create the sync_runs table.
//!
//! A run is the audit aggregate for one sync window and may span several job
//! executions when a job is paused and resumed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRuns::FromDate).date().not_null())
                    .col(ColumnDef::new(SyncRuns::ToDate).date().not_null())
                    .col(
                        ColumnDef::new(SyncRuns::StartTime)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::EndTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::TotalOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::SuccessfulOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::FailedOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::SkippedOrders)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(ColumnDef::new(SyncRuns::CreatedBy).text().not_null())
                    .to_owned(),
            )
            .await?;

        // Resume looks up the most recent run for a window/owner
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_window_owner_start")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::CreatedBy)
                    .col(SyncRuns::FromDate)
                    .col(SyncRuns::ToDate)
                    .col(SyncRuns::StartTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_runs_window_owner_start")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    FromDate,
    ToDate,
    StartTime,
    EndTime,
    TotalOrders,
    SuccessfulOrders,
    FailedOrders,
    SkippedOrders,
    Status,
    CreatedBy,
}
