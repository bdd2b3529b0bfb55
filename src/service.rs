//! # Pipes Service
//!
//! Operations behind the HTTP API. Each takes the caller's workspace id and
//! returns a [`PipeError`] kind; handlers only translate transport concerns.

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::authorization::{AuthParams, AuthorizationService};
use crate::db;
use crate::error::PipeError;
use crate::integrations::{
    AdapterError, AuthType, IntegrationCatalog, IntegrationDefinition, Vendor, VendorRegistry,
};
use crate::pipes::{Pipe, PipeId, Status, UsersSelector, pipes_key};
use crate::platform::{Account, PlatformClient, Staged, User};
use crate::repositories::{IdMappingRepository, ImportRepository, PipeRepository};
use crate::scheduler::{RunExecutor, RunScheduler, RunTicket};
use crate::sync::ACCOUNTS_OBJECT;

/// Partial pipe update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PipeUpdate {
    #[serde(default)]
    pub automatic: Option<bool>,
    #[serde(default)]
    pub service_params: Option<Value>,
}

/// Catalog pipe merged with the workspace's stored state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PipeView {
    pub id: PipeId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub automatic_option: bool,
    pub premium: bool,
    pub configured: bool,
    pub automatic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe_status: Option<Status>,
}

/// Catalog integration merged with the workspace's authorization state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntegrationView {
    pub id: Vendor,
    pub name: String,
    pub link: String,
    pub image: String,
    pub auth_type: AuthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    pub authorized: bool,
    pub pipes: Vec<PipeView>,
}

#[derive(Clone)]
pub struct PipesService {
    db: Arc<DatabaseConnection>,
    pipes: PipeRepository,
    imports: ImportRepository,
    mappings: IdMappingRepository,
    authorizations: AuthorizationService,
    catalog: Arc<IntegrationCatalog>,
    registry: Arc<VendorRegistry>,
    platform: Arc<dyn PlatformClient>,
    executor: Arc<RunExecutor>,
    scheduler: RunScheduler,
}

impl PipesService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        pipes: PipeRepository,
        imports: ImportRepository,
        mappings: IdMappingRepository,
        authorizations: AuthorizationService,
        catalog: Arc<IntegrationCatalog>,
        registry: Arc<VendorRegistry>,
        platform: Arc<dyn PlatformClient>,
        executor: Arc<RunExecutor>,
        scheduler: RunScheduler,
    ) -> Self {
        Self {
            db,
            pipes,
            imports,
            mappings,
            authorizations,
            catalog,
            registry,
            platform,
            executor,
            scheduler,
        }
    }

    pub fn platform(&self) -> &Arc<dyn PlatformClient> {
        &self.platform
    }

    fn integration(&self, vendor: Vendor) -> Result<&IntegrationDefinition, PipeError> {
        self.catalog
            .get(vendor)
            .ok_or_else(|| PipeError::UnknownVendor(vendor.to_string()))
    }

    /// Rejects pipes the catalog does not offer for the vendor.
    fn check_offered(&self, vendor: Vendor, pipe: PipeId) -> Result<(), PipeError> {
        if self.integration(vendor)?.offers(pipe) {
            Ok(())
        } else {
            Err(PipeError::UnknownPipe(pipe.to_string()))
        }
    }

    /// Runs the params through a fresh adapter.
    fn validate_params(&self, workspace_id: i64, vendor: Vendor, params: &Value) -> Result<(), PipeError> {
        let mut adapter = self
            .registry
            .create(vendor, workspace_id)
            .map_err(|_| PipeError::UnknownVendor(vendor.to_string()))?;
        adapter.set_params(params).map_err(|err| match err {
            AdapterError::InvalidParams(message) => PipeError::InvalidParameters(message),
            other => PipeError::invalid(other.to_string()),
        })
    }

    async fn configured_pipe(&self, workspace_id: i64, vendor: Vendor, id: PipeId) -> Result<Pipe, PipeError> {
        self.pipes
            .load(workspace_id, &pipes_key(vendor, id))
            .await?
            .filter(|pipe| pipe.configured)
            .ok_or(PipeError::NotConfigured)
    }

    /// Stored pipe with its status, or an unconfigured placeholder.
    pub async fn get_pipe(&self, workspace_id: i64, vendor: Vendor, id: PipeId) -> Result<Pipe, PipeError> {
        self.check_offered(vendor, id)?;
        let key = pipes_key(vendor, id);
        let mut pipe = self
            .pipes
            .load(workspace_id, &key)
            .await?
            .unwrap_or_else(|| Pipe::new(workspace_id, vendor, id));
        pipe.status = self.pipes.load_status(workspace_id, &key).await?;
        Ok(pipe)
    }

    #[instrument(skip(self, params))]
    pub async fn create_pipe(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        id: PipeId,
        params: Value,
    ) -> Result<Pipe, PipeError> {
        self.check_offered(vendor, id)?;
        self.validate_params(workspace_id, vendor, &params)?;

        let mut pipe = self
            .pipes
            .load(workspace_id, &pipes_key(vendor, id))
            .await?
            .unwrap_or_else(|| Pipe::new(workspace_id, vendor, id));
        pipe.service_params = (!params.is_null()).then_some(params);
        pipe.configured = true;
        self.pipes.save(&pipe).await?;
        info!("pipe configured");
        Ok(pipe)
    }

    #[instrument(skip(self, update))]
    pub async fn update_pipe(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        id: PipeId,
        update: PipeUpdate,
    ) -> Result<Pipe, PipeError> {
        let mut pipe = self.configured_pipe(workspace_id, vendor, id).await?;
        if let Some(params) = update.service_params {
            self.validate_params(workspace_id, vendor, &params)?;
            pipe.service_params = (!params.is_null()).then_some(params);
        }
        if let Some(automatic) = update.automatic {
            pipe.automatic = automatic;
        }
        self.pipes.save(&pipe).await?;
        Ok(pipe)
    }

    pub async fn delete_pipe(&self, workspace_id: i64, vendor: Vendor, id: PipeId) -> Result<(), PipeError> {
        let _guard = self.executor.locks().acquire(workspace_id).await;
        if !self.pipes.delete(workspace_id, &pipes_key(vendor, id)).await? {
            return Err(PipeError::NotConfigured);
        }
        info!(workspace_id, %vendor, pipe = %id, "pipe deleted");
        Ok(())
    }

    /// Plain-text log of the latest run.
    pub async fn pipe_log(&self, workspace_id: i64, vendor: Vendor, id: PipeId) -> Result<String, PipeError> {
        self.pipes
            .load_status(workspace_id, &pipes_key(vendor, id))
            .await?
            .map(|status| status.generate_log())
            .ok_or(PipeError::NoContent)
    }

    /// Forgets every platform id learned by the pipe. The next run posts all
    /// objects as new.
    #[instrument(skip(self))]
    pub async fn clear_id_mappings(&self, workspace_id: i64, vendor: Vendor, id: PipeId) -> Result<(), PipeError> {
        let _guard = self.executor.locks().acquire(workspace_id).await;
        let pipe = self.configured_pipe(workspace_id, vendor, id).await?;
        let adapter = self
            .registry
            .create(vendor, workspace_id)
            .map_err(|_| PipeError::UnknownVendor(vendor.to_string()))?;
        self.mappings
            .delete(workspace_id, &adapter.key_for(id.as_str()))
            .await?;
        self.pipes.delete_status(workspace_id, &pipe.key()).await?;
        info!("id mappings cleared");
        Ok(())
    }

    /// Staged vendor users. With `force` the staged batch is dropped and a
    /// background fetch restages it.
    #[instrument(skip(self))]
    pub async fn service_users(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        force: bool,
    ) -> Result<Staged<User>, PipeError> {
        let auth = self
            .authorizations
            .load(workspace_id, vendor)
            .await
            .map_err(PipeError::from)?;
        let pipe = self.configured_pipe(workspace_id, vendor, PipeId::Users).await?;
        self.validate_params(workspace_id, vendor, &pipe.params())?;

        let key = self
            .executor
            .sync()
            .object_key(&pipe, PipeId::Users.as_str())
            .map_err(|err| err.classify())?;
        if force {
            self.imports.delete(workspace_id, &key).await?;
        }
        if let Some(staged) = self.imports.latest::<Staged<User>>(workspace_id, &key).await? {
            return Ok(staged);
        }

        if force {
            let executor = self.executor.clone();
            let authorizations = self.authorizations.clone();
            tokio::spawn(async move {
                let _guard = executor.locks().acquire(workspace_id).await;
                let auth = match authorizations.refresh(auth).await {
                    Ok(auth) => auth,
                    Err(err) => {
                        warn!(workspace_id, %vendor, error = %err, "users fetch skipped");
                        return;
                    }
                };
                if let Err(err) = executor.sync().fetch_users(&pipe, &auth).await {
                    warn!(workspace_id, %vendor, error = %err, "background users fetch failed");
                }
            });
        }
        Err(PipeError::NoContent)
    }

    /// Staged vendor accounts, fetched in the background when absent.
    #[instrument(skip(self))]
    pub async fn service_accounts(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        force: bool,
    ) -> Result<Staged<Account>, PipeError> {
        let auth = self
            .authorizations
            .load(workspace_id, vendor)
            .await
            .map_err(PipeError::from)?;
        let auth = self
            .authorizations
            .refresh(auth)
            .await
            .map_err(PipeError::from)?;

        // Accounts are not tied to a pipe; any pipe id carries the vendor.
        let pipe = Pipe::new(workspace_id, vendor, PipeId::Projects);
        let key = self
            .executor
            .sync()
            .object_key(&pipe, ACCOUNTS_OBJECT)
            .map_err(|err| err.classify())?;
        if force {
            self.imports.delete(workspace_id, &key).await?;
        }
        if let Some(staged) = self.imports.latest::<Staged<Account>>(workspace_id, &key).await? {
            return Ok(staged);
        }

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let _guard = executor.locks().acquire(workspace_id).await;
            if let Err(err) = executor.sync().fetch_accounts(&pipe, &auth).await {
                warn!(workspace_id, %vendor, error = %err, "background accounts fetch failed");
            }
        });
        Err(PipeError::NoContent)
    }

    pub async fn create_authorization(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        workspace_token: &str,
        params: &AuthParams,
    ) -> Result<(), PipeError> {
        self.integration(vendor)?;
        self.authorizations
            .create(workspace_id, vendor, workspace_token, params)
            .await
            .map_err(PipeError::from)
    }

    pub async fn delete_authorization(&self, workspace_id: i64, vendor: Vendor) -> Result<(), PipeError> {
        self.integration(vendor)?;
        let _guard = self.executor.locks().acquire(workspace_id).await;
        self.authorizations
            .delete(workspace_id, vendor)
            .await
            .map_err(PipeError::from)
    }

    pub async fn auth_url(
        &self,
        vendor: Vendor,
        account_name: &str,
        callback_url: &str,
    ) -> Result<String, PipeError> {
        self.authorizations
            .auth_url(vendor, account_name, callback_url)
            .await
            .map_err(PipeError::from)
    }

    /// The catalog as seen by one workspace.
    pub async fn integrations(&self, workspace_id: i64) -> Result<Vec<IntegrationView>, PipeError> {
        let authorized = self
            .authorizations
            .authorized_vendors(workspace_id)
            .await
            .map_err(PipeError::from)?;
        let stored: HashMap<String, Pipe> = self
            .pipes
            .list_for_workspace(workspace_id)
            .await?
            .into_iter()
            .map(|pipe| (pipe.key(), pipe))
            .collect();
        let mut statuses = self.pipes.list_statuses(workspace_id).await?;

        let mut views = Vec::new();
        for integration in self.catalog.iter() {
            let auth_url = match integration.auth_type {
                AuthType::OAuth2 => self.authorizations.oauth().oauth2_url(integration.id),
                AuthType::OAuth1 => None,
            };
            let pipes = integration
                .pipes
                .iter()
                .map(|definition| {
                    let key = pipes_key(integration.id, definition.id);
                    let pipe = stored.get(&key);
                    PipeView {
                        id: definition.id,
                        name: definition.name.clone(),
                        description: definition.description.clone(),
                        automatic_option: definition.automatic_option,
                        premium: definition.premium,
                        configured: pipe.is_some_and(|p| p.configured),
                        automatic: pipe.is_some_and(|p| p.automatic),
                        pipe_status: statuses.remove(&key),
                    }
                })
                .collect();
            views.push(IntegrationView {
                id: integration.id,
                name: integration.name.clone(),
                link: integration.link.clone(),
                image: integration.image.clone(),
                auth_type: integration.auth_type,
                auth_url,
                authorized: authorized.contains(&integration.id),
                pipes,
            });
        }
        Ok(views)
    }

    /// Requests a run. Users runs need a selector payload and start on a
    /// worker right away; all other pipes are queued.
    #[instrument(skip(self, payload))]
    pub async fn run_pipe(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        id: PipeId,
        payload: &[u8],
    ) -> Result<RunTicket, PipeError> {
        let mut pipe = self.configured_pipe(workspace_id, vendor, id).await?;
        if id == PipeId::Users {
            pipe.users_selector = Some(UsersSelector::parse(payload)?);
            return self.scheduler.run_now(pipe).await;
        }
        self.scheduler.enqueue_first(&pipe).await
    }

    /// Problems that make the service unready; empty when healthy.
    pub async fn ready(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(err) = db::health_check(&self.db).await {
            warn!(error = %err, "database health check failed");
            problems.push("database is down".to_string());
        }
        if let Err(err) = self.platform.ping().await {
            problems.push(err.to_string());
        }
        problems
    }
}
