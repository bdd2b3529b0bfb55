//! # Queue Repository
//!
//! Deferred pipe runs. Workers claim rows with a conditional update on
//! `locked_at IS NULL`, so each row is run by at most one worker. A partial
//! unique index allows one unclaimed row per pipe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use tracing::debug;

use crate::integrations::Vendor;
use crate::models::queued_pipe;
use crate::pipes::PipeId;

/// Priority of runs requested through the API.
pub const PRIORITY_HIGH: i32 = 10;
/// Priority of autosync runs.
pub const PRIORITY_NORMAL: i32 = 0;

/// A claimed queue row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRun {
    pub id: i32,
    pub workspace_id: i64,
    pub vendor: Vendor,
    pub pipe: PipeId,
}

#[derive(Debug, Clone)]
pub struct QueueRepository {
    db: Arc<DatabaseConnection>,
}

impl QueueRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Adds a row unless an unclaimed one already exists for the pipe.
    /// Returns true when a row was inserted.
    pub async fn enqueue(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        pipe: PipeId,
        priority: i32,
    ) -> Result<bool, DbErr> {
        let row = queued_pipe::ActiveModel {
            workspace_id: Set(workspace_id),
            service_id: Set(vendor.to_string()),
            pipe_id: Set(pipe.to_string()),
            priority: Set(priority),
            queued_at: Set(Utc::now().fixed_offset()),
            locked_at: Set(None),
            synced_at: Set(None),
            ..Default::default()
        };
        // idx_pipes_queue_pending keeps one unclaimed row per pipe.
        let inserted = queued_pipe::Entity::insert(row)
            .on_conflict(OnConflict::new().do_nothing().to_owned())
            .exec_without_returning(self.db.as_ref())
            .await?;
        if inserted == 0 {
            debug!(workspace_id, %vendor, %pipe, "pipe already queued");
        }
        Ok(inserted > 0)
    }

    /// Claims up to `limit` rows, highest priority first, then oldest.
    pub async fn claim(&self, limit: u64) -> Result<Vec<QueuedRun>, DbErr> {
        let candidates = queued_pipe::Entity::find()
            .filter(queued_pipe::Column::LockedAt.is_null())
            .order_by_desc(queued_pipe::Column::Priority)
            .order_by_asc(queued_pipe::Column::QueuedAt)
            .order_by_asc(queued_pipe::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for row in candidates {
            let result = queued_pipe::Entity::update_many()
                .col_expr(
                    queued_pipe::Column::LockedAt,
                    Expr::value(Utc::now().fixed_offset()),
                )
                .filter(queued_pipe::Column::Id.eq(row.id))
                .filter(queued_pipe::Column::LockedAt.is_null())
                .exec(self.db.as_ref())
                .await?;
            if result.rows_affected == 0 {
                // Another worker won the row.
                continue;
            }

            match (row.service_id.parse::<Vendor>(), row.pipe_id.parse::<PipeId>()) {
                (Ok(vendor), Ok(pipe)) => claimed.push(QueuedRun {
                    id: row.id,
                    workspace_id: row.workspace_id,
                    vendor,
                    pipe,
                }),
                _ => {
                    tracing::warn!(
                        id = row.id,
                        service_id = %row.service_id,
                        pipe_id = %row.pipe_id,
                        "dropping unrecognized queue row"
                    );
                    self.mark_synced(row.id).await?;
                }
            }
        }
        Ok(claimed)
    }

    pub async fn mark_synced(&self, id: i32) -> Result<(), DbErr> {
        queued_pipe::Entity::update_many()
            .col_expr(
                queued_pipe::Column::SyncedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(queued_pipe::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Deletes rows that finished before `cutoff`. Returns the count.
    pub async fn prune_synced(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = queued_pipe::Entity::delete_many()
            .filter(queued_pipe::Column::SyncedAt.lt(cutoff.fixed_offset()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
