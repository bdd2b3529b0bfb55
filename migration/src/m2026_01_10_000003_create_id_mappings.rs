//! Creates the `id_mappings` table holding foreign-to-internal id maps.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdMappings::WorkspaceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IdMappings::Key).string().not_null())
                    .col(ColumnDef::new(IdMappings::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(IdMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_id_mappings")
                            .col(IdMappings::WorkspaceId)
                            .col(IdMappings::Key),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IdMappings {
    Table,
    WorkspaceId,
    Key,
    Data,
    UpdatedAt,
}
