//! # Pipe Repository
//!
//! Pipes and their latest status, keyed by workspace and pipe key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::integrations::Vendor;
use crate::models::{pipe, pipe_status};
use crate::pipes::{Pipe, PipeId, Status};

#[derive(Debug, Clone)]
pub struct PipeRepository {
    db: Arc<DatabaseConnection>,
}

impl PipeRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn load(&self, workspace_id: i64, key: &str) -> Result<Option<Pipe>, DbErr> {
        let row = pipe::Entity::find_by_id((workspace_id, key.to_string()))
            .one(self.db.as_ref())
            .await?;
        row.map(into_pipe).transpose()
    }

    pub async fn list_for_workspace(&self, workspace_id: i64) -> Result<Vec<Pipe>, DbErr> {
        pipe::Entity::find()
            .filter(pipe::Column::WorkspaceId.eq(workspace_id))
            .order_by_asc(pipe::Column::Key)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(into_pipe)
            .collect()
    }

    /// Configured pipes with autosync enabled, across all workspaces.
    pub async fn list_automatic(&self) -> Result<Vec<Pipe>, DbErr> {
        pipe::Entity::find()
            .filter(pipe::Column::Automatic.eq(true))
            .filter(pipe::Column::Configured.eq(true))
            .order_by_asc(pipe::Column::WorkspaceId)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(into_pipe)
            .collect()
    }

    /// Inserts or replaces the pipe row. The status is stored separately.
    pub async fn save(&self, pipe: &Pipe) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        let row = pipe::ActiveModel {
            workspace_id: Set(pipe.workspace_id),
            key: Set(pipe.key()),
            service_id: Set(pipe.vendor.to_string()),
            pipe_id: Set(pipe.id.to_string()),
            configured: Set(pipe.configured),
            automatic: Set(pipe.automatic),
            service_params: Set(pipe.service_params.clone()),
            last_sync: Set(pipe.last_sync.map(|t| t.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        pipe::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([pipe::Column::WorkspaceId, pipe::Column::Key])
                    .update_columns([
                        pipe::Column::Configured,
                        pipe::Column::Automatic,
                        pipe::Column::ServiceParams,
                        pipe::Column::LastSync,
                        pipe::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn update_last_sync(
        &self,
        workspace_id: i64,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        pipe::Entity::update_many()
            .col_expr(pipe::Column::LastSync, Expr::value(at.fixed_offset()))
            .col_expr(pipe::Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(pipe::Column::WorkspaceId.eq(workspace_id))
            .filter(pipe::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Deletes the pipe and its status. Returns false when no pipe existed.
    pub async fn delete(&self, workspace_id: i64, key: &str) -> Result<bool, DbErr> {
        let result = pipe::Entity::delete_many()
            .filter(pipe::Column::WorkspaceId.eq(workspace_id))
            .filter(pipe::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        self.delete_status(workspace_id, key).await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn delete_for_vendor(&self, workspace_id: i64, vendor: Vendor) -> Result<u64, DbErr> {
        let result = pipe::Entity::delete_many()
            .filter(pipe::Column::WorkspaceId.eq(workspace_id))
            .filter(pipe::Column::ServiceId.eq(vendor.as_str()))
            .exec(self.db.as_ref())
            .await?;
        pipe_status::Entity::delete_many()
            .filter(pipe_status::Column::WorkspaceId.eq(workspace_id))
            .filter(pipe_status::Column::Key.starts_with(format!("{}:", vendor)))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn load_status(&self, workspace_id: i64, key: &str) -> Result<Option<Status>, DbErr> {
        let row = pipe_status::Entity::find_by_id((workspace_id, key.to_string()))
            .one(self.db.as_ref())
            .await?;
        row.map(|r| decode_status(r.data)).transpose()
    }

    /// All statuses of a workspace, keyed by pipe key.
    pub async fn list_statuses(&self, workspace_id: i64) -> Result<HashMap<String, Status>, DbErr> {
        let rows = pipe_status::Entity::find()
            .filter(pipe_status::Column::WorkspaceId.eq(workspace_id))
            .all(self.db.as_ref())
            .await?;
        let mut statuses = HashMap::with_capacity(rows.len());
        for row in rows {
            statuses.insert(row.key, decode_status(row.data)?);
        }
        Ok(statuses)
    }

    pub async fn save_status(&self, status: &Status) -> Result<(), DbErr> {
        let data = serde_json::to_value(status)
            .map_err(|e| DbErr::Custom(format!("failed to encode status: {e}")))?;
        let row = pipe_status::ActiveModel {
            workspace_id: Set(status.workspace_id),
            key: Set(status.key.clone()),
            data: Set(data),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        pipe_status::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([pipe_status::Column::WorkspaceId, pipe_status::Column::Key])
                    .update_columns([pipe_status::Column::Data, pipe_status::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn delete_status(&self, workspace_id: i64, key: &str) -> Result<(), DbErr> {
        pipe_status::Entity::delete_many()
            .filter(pipe_status::Column::WorkspaceId.eq(workspace_id))
            .filter(pipe_status::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}

fn decode_status(data: serde_json::Value) -> Result<Status, DbErr> {
    serde_json::from_value(data).map_err(|e| DbErr::Custom(format!("corrupt pipe status: {e}")))
}

fn into_pipe(row: pipe::Model) -> Result<Pipe, DbErr> {
    let vendor: Vendor = row
        .service_id
        .parse()
        .map_err(|e| DbErr::Custom(format!("pipe row {}: {e}", row.key)))?;
    let id: PipeId = row
        .pipe_id
        .parse()
        .map_err(|e| DbErr::Custom(format!("pipe row {}: {e}", row.key)))?;

    Ok(Pipe {
        configured: row.configured,
        automatic: row.automatic,
        service_params: row.service_params,
        last_sync: row.last_sync.map(|t| t.with_timezone(&Utc)),
        ..Pipe::new(row.workspace_id, vendor, id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn repo() -> PipeRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        PipeRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn save_then_load_round_trips_configuration() {
        let repo = repo().await;
        let mut pipe = Pipe::new(5, Vendor::Asana, PipeId::Projects);
        pipe.configured = true;
        pipe.service_params = Some(json!({"account_id": 1}));
        repo.save(&pipe).await.unwrap();

        pipe.automatic = true;
        repo.save(&pipe).await.unwrap();

        let loaded = repo.load(5, "asana:projects").await.unwrap().unwrap();
        assert!(loaded.configured);
        assert!(loaded.automatic);
        assert_eq!(loaded.service_params, Some(json!({"account_id": 1})));
        assert!(repo.load(6, "asana:projects").await.unwrap().is_none());
        assert_eq!(repo.list_automatic().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vendor_delete_removes_pipes_and_statuses() {
        let repo = repo().await;
        for id in [PipeId::Users, PipeId::Projects] {
            let pipe = Pipe::new(1, Vendor::Asana, id);
            repo.save(&pipe).await.unwrap();
            repo.save_status(&Status::start(1, pipe.key(), None, ""))
                .await
                .unwrap();
        }
        repo.save(&Pipe::new(1, Vendor::GitHub, PipeId::Projects))
            .await
            .unwrap();

        assert_eq!(repo.delete_for_vendor(1, Vendor::Asana).await.unwrap(), 2);
        assert!(repo.load_status(1, "asana:users").await.unwrap().is_none());
        assert_eq!(repo.list_for_workspace(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_is_replaced_not_appended() {
        let repo = repo().await;
        let first = Status::start(1, "github:projects", None, "");
        repo.save_status(&first).await.unwrap();
        let second = Status::start(1, "github:projects", Some(&first), "");
        repo.save_status(&second).await.unwrap();

        let loaded = repo.load_status(1, "github:projects").await.unwrap().unwrap();
        assert_eq!(loaded.run, 2);
        assert_eq!(repo.list_statuses(1).await.unwrap().len(), 1);
    }
}
