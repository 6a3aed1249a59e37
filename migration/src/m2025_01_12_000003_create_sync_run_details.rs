//! Migration to create the sync_run_details table.
//!
//! One row per order attempted within a run, with the outcome of each of the
//! five pipeline steps. The `(run_id, order_number)` unique index backs the
//! "at most one detail per order per run" rule that resume relies on.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRunDetails::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncRunDetails::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncRunDetails::RunId).uuid().not_null())
                    .col(ColumnDef::new(SyncRunDetails::OrderNumber).text().not_null())
                    .col(ColumnDef::new(SyncRunDetails::OrderDate).date().not_null())
                    .col(ColumnDef::new(SyncRunDetails::CustomerPhone).text().null())
                    .col(
                        ColumnDef::new(SyncRunDetails::ProductNames)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(SyncRunDetails::TotalAmount)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(SyncRunDetails::SyncStatus).text().not_null())
                    .col(ColumnDef::new(SyncRunDetails::ErrorMessage).text().null())
                    .col(step_column(SyncRunDetails::StepCustomer))
                    .col(step_column(SyncRunDetails::StepBrand))
                    .col(step_column(SyncRunDetails::StepProduct))
                    .col(step_column(SyncRunDetails::StepOrder))
                    .col(step_column(SyncRunDetails::StepPurchase))
                    .col(
                        ColumnDef::new(SyncRunDetails::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRunDetails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRunDetails::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_run_details_run_id")
                            .from(SyncRunDetails::Table, SyncRunDetails::RunId)
                            .to(SyncRuns::Table, SyncRuns::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_run_details_run_order")
                    .table(SyncRunDetails::Table)
                    .col(SyncRunDetails::RunId)
                    .col(SyncRunDetails::OrderNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_run_details_run_status")
                    .table(SyncRunDetails::Table)
                    .col(SyncRunDetails::RunId)
                    .col(SyncRunDetails::SyncStatus)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_run_details_run_order")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_run_details_run_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRunDetails::Table).to_owned())
            .await
    }
}

fn step_column(column: SyncRunDetails) -> ColumnDef {
    ColumnDef::new(column)
        .text()
        .not_null()
        .default("pending")
        .to_owned()
}

#[derive(DeriveIden)]
enum SyncRunDetails {
    Table,
    Id,
    RunId,
    OrderNumber,
    OrderDate,
    CustomerPhone,
    ProductNames,
    TotalAmount,
    SyncStatus,
    ErrorMessage,
    StepCustomer,
    StepBrand,
    StepProduct,
    StepOrder,
    StepPurchase,
    RetryCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
}
