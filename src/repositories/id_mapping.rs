//! # Identifier Mapping Repository

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};

use crate::integrations::Vendor;
use crate::models::id_mapping;
use crate::pipes::IdMapping;

#[derive(Debug, Clone)]
pub struct IdMappingRepository {
    db: Arc<DatabaseConnection>,
}

impl IdMappingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Loads the mapping, or an empty one when nothing was saved yet.
    pub async fn load(&self, workspace_id: i64, key: &str) -> Result<IdMapping, DbErr> {
        let row = id_mapping::Entity::find_by_id((workspace_id, key.to_string()))
            .one(self.db.as_ref())
            .await?;
        let Some(row) = row else {
            return Ok(IdMapping::new(workspace_id, key));
        };
        let data: BTreeMap<String, i64> = serde_json::from_value(row.data)
            .map_err(|e| DbErr::Custom(format!("corrupt id mapping {key}: {e}")))?;
        Ok(IdMapping {
            workspace_id,
            key: key.to_string(),
            data,
        })
    }

    /// Replaces the whole stored mapping.
    pub async fn save(&self, mapping: &IdMapping) -> Result<(), DbErr> {
        let data = serde_json::to_value(&mapping.data)
            .map_err(|e| DbErr::Custom(format!("failed to encode id mapping: {e}")))?;
        let row = id_mapping::ActiveModel {
            workspace_id: Set(mapping.workspace_id),
            key: Set(mapping.key.clone()),
            data: Set(data),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        id_mapping::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([id_mapping::Column::WorkspaceId, id_mapping::Column::Key])
                    .update_columns([id_mapping::Column::Data, id_mapping::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, workspace_id: i64, key: &str) -> Result<(), DbErr> {
        id_mapping::Entity::delete_many()
            .filter(id_mapping::Column::WorkspaceId.eq(workspace_id))
            .filter(id_mapping::Column::Key.eq(key))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Drops every `"<vendor>:*"` mapping of the workspace. Returns the row count.
    pub async fn delete_for_vendor(&self, workspace_id: i64, vendor: Vendor) -> Result<u64, DbErr> {
        let result = id_mapping::Entity::delete_many()
            .filter(id_mapping::Column::WorkspaceId.eq(workspace_id))
            .filter(id_mapping::Column::Key.starts_with(format!("{vendor}:")))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn missing_mapping_loads_empty_and_save_replaces() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = IdMappingRepository::new(Arc::new(db));

        let mut mapping = repo.load(3, "asana:projects").await.unwrap();
        assert!(mapping.is_empty());

        mapping.insert("p1", 101);
        mapping.insert("p2", 102);
        repo.save(&mapping).await.unwrap();

        let mut replaced = IdMapping::new(3, "asana:projects");
        replaced.insert("p3", 103);
        repo.save(&replaced).await.unwrap();

        let loaded = repo.load(3, "asana:projects").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("p3"), 103);
        assert_eq!(loaded.get("p1"), 0);

        repo.delete(3, "asana:projects").await.unwrap();
        assert!(repo.load(3, "asana:projects").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vendor_delete_spares_other_vendors_and_workspaces() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = IdMappingRepository::new(Arc::new(db));

        for (ws, key) in [(3, "asana:projects"), (3, "asana:tasks"), (3, "github:projects"), (4, "asana:projects")] {
            let mut mapping = IdMapping::new(ws, key);
            mapping.insert("x", 1);
            repo.save(&mapping).await.unwrap();
        }

        assert_eq!(repo.delete_for_vendor(3, Vendor::Asana).await.unwrap(), 2);
        assert!(repo.load(3, "asana:tasks").await.unwrap().is_empty());
        assert_eq!(repo.load(3, "github:projects").await.unwrap().get("x"), 1);
        assert_eq!(repo.load(4, "asana:projects").await.unwrap().get("x"), 1);
    }
}
