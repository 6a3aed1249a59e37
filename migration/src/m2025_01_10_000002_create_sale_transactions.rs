//! Migration to create the sale_transactions table.
//!
//! One row per sold line item. `date_int` carries the transaction date as a
//! `YYYYMMDD` integer so window filters are plain integer range scans.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SaleTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SaleTransactions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SaleTransactions::OrderNumber).text().not_null())
                    .col(
                        ColumnDef::new(SaleTransactions::TransactionDate)
                            .date()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SaleTransactions::DateInt).integer().not_null())
                    .col(ColumnDef::new(SaleTransactions::CustomerPhone).text().null())
                    .col(ColumnDef::new(SaleTransactions::CustomerName).text().null())
                    .col(ColumnDef::new(SaleTransactions::ProductSku).text().not_null())
                    .col(ColumnDef::new(SaleTransactions::ProductName).text().not_null())
                    .col(ColumnDef::new(SaleTransactions::BrandName).text().null())
                    .col(
                        ColumnDef::new(SaleTransactions::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(SaleTransactions::UnitPrice)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(SaleTransactions::PaymentMethod)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SaleTransactions::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SaleTransactions::SentToErp)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        // Window scans filter on the sent flag and date range together
        manager
            .create_index(
                Index::create()
                    .name("idx_sale_transactions_sent_date_int")
                    .table(SaleTransactions::Table)
                    .col(SaleTransactions::SentToErp)
                    .col(SaleTransactions::DateInt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sale_transactions_order_number")
                    .table(SaleTransactions::Table)
                    .col(SaleTransactions::OrderNumber)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sale_transactions_sent_date_int")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_sale_transactions_order_number")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SaleTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SaleTransactions {
    Table,
    Id,
    OrderNumber,
    TransactionDate,
    DateInt,
    CustomerPhone,
    CustomerName,
    ProductSku,
    ProductName,
    BrandName,
    Quantity,
    UnitPrice,
    PaymentMethod,
    IsDeleted,
    SentToErp,
}
