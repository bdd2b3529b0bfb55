//! Creates the `imports` staging table.
//!
//! Rows are append-only; readers take the newest row per workspace and key.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Imports::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Imports::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Imports::WorkspaceId).big_integer().not_null())
                    .col(ColumnDef::new(Imports::Key).string().not_null())
                    .col(ColumnDef::new(Imports::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(Imports::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_imports_workspace_key")
                    .table(Imports::Table)
                    .col(Imports::WorkspaceId)
                    .col(Imports::Key)
                    .col(Imports::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_imports_workspace_key").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Imports::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Imports {
    Table,
    Id,
    WorkspaceId,
    Key,
    Data,
    CreatedAt,
}
