//! Creates the `pipes_queue` table consumed by the queue worker.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipesQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipesQueue::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PipesQueue::WorkspaceId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PipesQueue::ServiceId).string().not_null())
                    .col(ColumnDef::new(PipesQueue::PipeId).string().not_null())
                    .col(
                        ColumnDef::new(PipesQueue::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PipesQueue::QueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipesQueue::LockedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PipesQueue::SyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim query: unlocked rows ordered by priority then age
        manager
            .create_index(
                Index::create()
                    .name("idx_pipes_queue_claim")
                    .table(PipesQueue::Table)
                    .col(PipesQueue::LockedAt)
                    .col(PipesQueue::Priority)
                    .col(PipesQueue::QueuedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_pipes_queue_claim").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PipesQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PipesQueue {
    Table,
    Id,
    WorkspaceId,
    ServiceId,
    PipeId,
    Priority,
    QueuedAt,
    LockedAt,
    SyncedAt,
}
