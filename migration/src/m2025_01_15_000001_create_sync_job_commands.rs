//! Migration to create the sync_job_commands table.
//!
//! Pause and cancel requests for a running job are appended here instead of
//! being written to the job row, so the worker stays the only writer of a
//! running job's counters and status.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobCommands::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncJobCommands::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncJobCommands::JobId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobCommands::Command).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobCommands::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobCommands::ConsumedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_job_commands_job_id")
                            .from(SyncJobCommands::Table, SyncJobCommands::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The worker polls unconsumed commands for its job once per order
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_job_commands_job_consumed")
                    .table(SyncJobCommands::Table)
                    .col(SyncJobCommands::JobId)
                    .col(SyncJobCommands::ConsumedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_job_commands_job_consumed")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobCommands::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobCommands {
    Table,
    Id,
    JobId,
    Command,
    CreatedAt,
    ConsumedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
