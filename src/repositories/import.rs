//! # Import Repository
//!
//! Staging buffer between the fetch and post halves of a stage. Rows are
//! appended; only the newest row for a key is ever read.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::models::import;

#[derive(Debug, Clone)]
pub struct ImportRepository {
    db: Arc<DatabaseConnection>,
}

impl ImportRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Newest staged value for `key`, if any.
    pub async fn latest<T: DeserializeOwned>(
        &self,
        workspace_id: i64,
        key: &str,
    ) -> Result<Option<T>, DbErr> {
        let row = import::Entity::find()
            .filter(import::Column::WorkspaceId.eq(workspace_id))
            .filter(import::Column::Key.eq(key))
            .order_by_desc(import::Column::CreatedAt)
            .order_by_desc(import::Column::Id)
            .one(self.db.as_ref())
            .await?;
        row.map(|r| {
            serde_json::from_value(r.data)
                .map_err(|e| DbErr::Custom(format!("corrupt import {key}: {e}")))
        })
        .transpose()
    }

    pub async fn save<T: Serialize>(
        &self,
        workspace_id: i64,
        key: &str,
        value: &T,
    ) -> Result<(), DbErr> {
        let data = serde_json::to_value(value)
            .map_err(|e| DbErr::Custom(format!("failed to encode import {key}: {e}")))?;
        import::ActiveModel {
            workspace_id: Set(workspace_id),
            key: Set(key.to_string()),
            data: Set(data),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn delete(&self, workspace_id: i64, key: &str) -> Result<(), DbErr> {
        import::Entity::delete_many()
            .filter(import::Column::WorkspaceId.eq(workspace_id))
            .filter(import::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Staged, User};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn latest_returns_newest_row() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = ImportRepository::new(Arc::new(db));

        assert!(repo
            .latest::<Staged<User>>(1, "asana:users")
            .await
            .unwrap()
            .is_none());

        let older = Staged {
            items: vec![User { foreign_id: "1".into(), ..User::default() }],
            error: None,
        };
        let newer: Staged<User> = Staged {
            items: Vec::new(),
            error: Some("rate limited".into()),
        };
        repo.save(1, "asana:users", &older).await.unwrap();
        repo.save(1, "asana:users", &newer).await.unwrap();

        let latest: Staged<User> = repo.latest(1, "asana:users").await.unwrap().unwrap();
        assert_eq!(latest, newer);

        repo.delete(1, "asana:users").await.unwrap();
        assert!(repo
            .latest::<Staged<User>>(1, "asana:users")
            .await
            .unwrap()
            .is_none());
    }
}
