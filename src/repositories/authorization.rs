//! # Authorization Repository
//!
//! Token blobs are sealed with the service crypto key before they reach the
//! database and opened again on load.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use thiserror::Error;

use crate::authorization::Authorization;
use crate::crypto::{CryptoError, CryptoKey, is_encrypted_payload, open_authorization, seal_authorization};
use crate::integrations::Vendor;
use crate::models::authorization;

#[derive(Debug, Error)]
pub enum AuthorizationStoreError {
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error("authorization blob could not be opened: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone)]
pub struct AuthorizationRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl AuthorizationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn load(
        &self,
        workspace_id: i64,
        vendor: Vendor,
    ) -> Result<Option<Authorization>, AuthorizationStoreError> {
        let row = authorization::Entity::find_by_id((workspace_id, vendor.to_string()))
            .one(self.db.as_ref())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        if !is_encrypted_payload(&row.data) {
            tracing::warn!(workspace_id, %vendor, "authorization stored without encryption");
        }
        let data = open_authorization(&self.crypto_key, workspace_id, vendor.as_str(), &row.data)?;
        Ok(Some(Authorization {
            workspace_id,
            vendor,
            workspace_token: row.workspace_token,
            data,
        }))
    }

    /// Inserts or replaces the authorization for its workspace and vendor.
    pub async fn save(&self, auth: &Authorization) -> Result<(), AuthorizationStoreError> {
        let sealed = seal_authorization(
            &self.crypto_key,
            auth.workspace_id,
            auth.vendor.as_str(),
            &auth.data,
        )?;
        let now = Utc::now().fixed_offset();
        let row = authorization::ActiveModel {
            workspace_id: Set(auth.workspace_id),
            service_id: Set(auth.vendor.to_string()),
            workspace_token: Set(auth.workspace_token.clone()),
            data: Set(sealed),
            created_at: Set(now),
            updated_at: Set(now),
        };
        authorization::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    authorization::Column::WorkspaceId,
                    authorization::Column::ServiceId,
                ])
                .update_columns([
                    authorization::Column::WorkspaceToken,
                    authorization::Column::Data,
                    authorization::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, workspace_id: i64, vendor: Vendor) -> Result<(), DbErr> {
        authorization::Entity::delete_many()
            .filter(authorization::Column::WorkspaceId.eq(workspace_id))
            .filter(authorization::Column::ServiceId.eq(vendor.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Vendors the workspace has authorized. Unknown ids are skipped.
    pub async fn authorized_vendors(&self, workspace_id: i64) -> Result<Vec<Vendor>, DbErr> {
        let rows = authorization::Entity::find()
            .filter(authorization::Column::WorkspaceId.eq(workspace_id))
            .order_by_asc(authorization::Column::ServiceId)
            .all(self.db.as_ref())
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.service_id.parse().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn repo() -> AuthorizationRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        AuthorizationRepository::new(Arc::new(db), CryptoKey::new(vec![3u8; 32]).unwrap())
    }

    fn auth(vendor: Vendor, data: &[u8]) -> Authorization {
        Authorization {
            workspace_id: 11,
            vendor,
            workspace_token: "ws-token".to_string(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn blob_is_sealed_at_rest_and_opened_on_load() {
        let repo = repo().await;
        let blob = br#"{"access_token":"secret-token"}"#;
        repo.save(&auth(Vendor::Asana, blob)).await.unwrap();

        let raw = models::Authorization::find_by_id((11, "asana".to_string()))
            .one(repo.db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert!(is_encrypted_payload(&raw.data));
        assert!(!String::from_utf8_lossy(&raw.data).contains("secret-token"));

        let loaded = repo.load(11, Vendor::Asana).await.unwrap().unwrap();
        assert_eq!(loaded.data, blob);
        assert_eq!(loaded.workspace_token, "ws-token");
    }

    #[tokio::test]
    async fn save_replaces_and_delete_removes() {
        let repo = repo().await;
        repo.save(&auth(Vendor::GitHub, b"{\"access_token\":\"a\"}")).await.unwrap();
        repo.save(&auth(Vendor::GitHub, b"{\"access_token\":\"b\"}")).await.unwrap();
        repo.save(&auth(Vendor::Asana, b"{\"access_token\":\"c\"}")).await.unwrap();

        let loaded = repo.load(11, Vendor::GitHub).await.unwrap().unwrap();
        assert_eq!(loaded.data, b"{\"access_token\":\"b\"}");
        assert_eq!(
            repo.authorized_vendors(11).await.unwrap(),
            vec![Vendor::Asana, Vendor::GitHub]
        );

        repo.delete(11, Vendor::GitHub).await.unwrap();
        assert!(repo.load(11, Vendor::GitHub).await.unwrap().is_none());
    }
}
