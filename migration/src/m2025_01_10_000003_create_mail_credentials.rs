//! Migration to create the mail_credentials table holding per-owner
//! notification credentials.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MailCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailCredentials::OwnerId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MailCredentials::SenderAddress)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MailCredentials::ApiToken).text().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MailCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MailCredentials {
    Table,
    OwnerId,
    SenderAddress,
    ApiToken,
}
