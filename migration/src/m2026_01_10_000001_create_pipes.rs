//! Creates the `pipes` and `pipe_statuses` tables.
//!
//! A pipe is keyed by workspace and `"<vendor>:<pipe>"` key; the status row
//! shares that key and is replaced at the start of every run.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pipes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pipes::WorkspaceId).big_integer().not_null())
                    .col(ColumnDef::new(Pipes::Key).string().not_null())
                    .col(ColumnDef::new(Pipes::ServiceId).string().not_null())
                    .col(ColumnDef::new(Pipes::PipeId).string().not_null())
                    .col(
                        ColumnDef::new(Pipes::Configured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Pipes::Automatic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Pipes::ServiceParams).json_binary().null())
                    .col(
                        ColumnDef::new(Pipes::LastSync)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Pipes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Pipes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_pipes")
                            .col(Pipes::WorkspaceId)
                            .col(Pipes::Key),
                    )
                    .to_owned(),
            )
            .await?;

        // Autosync scans configured + automatic pipes across all workspaces
        manager
            .create_index(
                Index::create()
                    .name("idx_pipes_automatic")
                    .table(Pipes::Table)
                    .col(Pipes::Automatic)
                    .col(Pipes::Configured)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PipeStatuses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipeStatuses::WorkspaceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipeStatuses::Key).string().not_null())
                    .col(ColumnDef::new(PipeStatuses::Data).json_binary().not_null())
                    .col(
                        ColumnDef::new(PipeStatuses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_pipe_statuses")
                            .col(PipeStatuses::WorkspaceId)
                            .col(PipeStatuses::Key),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PipeStatuses::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_pipes_automatic").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Pipes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Pipes {
    Table,
    WorkspaceId,
    Key,
    ServiceId,
    PipeId,
    Configured,
    Automatic,
    ServiceParams,
    LastSync,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PipeStatuses {
    Table,
    WorkspaceId,
    Key,
    Data,
    UpdatedAt,
}
