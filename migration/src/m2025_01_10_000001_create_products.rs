//! Migration to create the products table.
//!
//! Products are owned by the inventory module; the sync engine only reads the
//! non-stock flag and the supplier used for purchase orders.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Sku).text().not_null().primary_key())
                    .col(ColumnDef::new(Products::Name).text().not_null())
                    .col(ColumnDef::new(Products::BrandName).text().null())
                    .col(ColumnDef::new(Products::SupplierName).text().null())
                    .col(
                        ColumnDef::new(Products::IsNonStock)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_is_non_stock")
                    .table(Products::Table)
                    .col(Products::IsNonStock)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_products_is_non_stock").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Sku,
    Name,
    BrandName,
    SupplierName,
    IsNonStock,
}
