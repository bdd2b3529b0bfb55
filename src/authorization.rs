//! # Authorization Lifecycle
//!
//! Creates, loads, refreshes and deletes vendor authorizations. OAuth2
//! tokens are refreshed silently when expired; OAuth1 tokens never expire.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::error::PipeError;
use crate::integrations::{AuthType, IntegrationCatalog, Vendor};
use crate::oauth::{OAuth1Token, OAuth2Token, OAuthError, OAuthProvider};
use crate::repositories::{
    AuthorizationRepository, AuthorizationStoreError, IdMappingRepository, PipeRepository,
};

/// A vendor authorization of one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub workspace_id: i64,
    pub vendor: Vendor,
    /// Platform API token used when posting on behalf of the workspace.
    pub workspace_token: String,
    /// Opaque token blob handed to the adapter.
    pub data: Vec<u8>,
}

impl Authorization {
    pub fn new(workspace_id: i64, vendor: Vendor, workspace_token: impl Into<String>) -> Self {
        Self {
            workspace_id,
            vendor,
            workspace_token: workspace_token.into(),
            data: Vec::new(),
        }
    }

    pub fn set_oauth1_token(&mut self, token: &OAuth1Token) -> Result<(), serde_json::Error> {
        self.data = serde_json::to_vec(token)?;
        Ok(())
    }

    pub fn set_oauth2_token(&mut self, token: &OAuth2Token) -> Result<(), serde_json::Error> {
        self.data = serde_json::to_vec(token)?;
        Ok(())
    }

    pub fn oauth2_token(&self) -> Result<OAuth2Token, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

/// Body of the create-authorization request.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AuthParams {
    /// OAuth1 vendors: account subdomain used in the vendor URLs.
    #[serde(default, alias = "accountName")]
    pub account_name: String,
    /// OAuth1 request token.
    #[serde(default, alias = "oauth_token")]
    pub token: String,
    /// OAuth1 verifier.
    #[serde(default, alias = "oauth_verifier")]
    pub verifier: String,
    /// OAuth2 authorization code.
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("authorization not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] AuthorizationStoreError),
    #[error("{0}")]
    Refresh(String),
    #[error("{0}")]
    InvalidParameters(String),
    #[error("unknown integration '{0}'")]
    UnknownIntegration(Vendor),
    #[error("token exchange failed: {0}")]
    Exchange(#[from] OAuthError),
    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<sea_orm::DbErr> for AuthorizationError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Store(AuthorizationStoreError::Db(err))
    }
}

impl From<AuthorizationError> for PipeError {
    fn from(err: AuthorizationError) -> Self {
        match err {
            AuthorizationError::NotFound => PipeError::authorization_not_found(),
            AuthorizationError::Store(e) => PipeError::Load {
                message: e.to_string(),
                not_found: false,
            },
            AuthorizationError::Refresh(message) => PipeError::Refresh(message),
            AuthorizationError::InvalidParameters(message) => PipeError::InvalidParameters(message),
            AuthorizationError::UnknownIntegration(vendor) => {
                PipeError::UnknownVendor(vendor.to_string())
            }
            other => PipeError::internal(other),
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationService {
    repo: AuthorizationRepository,
    pipes: PipeRepository,
    mappings: IdMappingRepository,
    catalog: Arc<IntegrationCatalog>,
    oauth: Arc<dyn OAuthProvider>,
}

impl AuthorizationService {
    pub fn new(
        repo: AuthorizationRepository,
        pipes: PipeRepository,
        mappings: IdMappingRepository,
        catalog: Arc<IntegrationCatalog>,
        oauth: Arc<dyn OAuthProvider>,
    ) -> Self {
        Self {
            repo,
            pipes,
            mappings,
            catalog,
            oauth,
        }
    }

    pub fn oauth(&self) -> &Arc<dyn OAuthProvider> {
        &self.oauth
    }

    pub async fn load(
        &self,
        workspace_id: i64,
        vendor: Vendor,
    ) -> Result<Authorization, AuthorizationError> {
        self.repo
            .load(workspace_id, vendor)
            .await?
            .ok_or(AuthorizationError::NotFound)
    }

    pub async fn save(&self, auth: &Authorization) -> Result<(), AuthorizationError> {
        self.repo.save(auth).await?;
        Ok(())
    }

    /// Exchanges an expired OAuth2 token and persists the result. Any other
    /// authorization is returned unchanged.
    #[instrument(skip(self, auth), fields(workspace_id = auth.workspace_id, vendor = %auth.vendor))]
    pub async fn refresh(&self, auth: Authorization) -> Result<Authorization, AuthorizationError> {
        let auth_type = self
            .catalog
            .auth_type(auth.vendor)
            .ok_or_else(|| AuthorizationError::Refresh(format!("unknown integration '{}'", auth.vendor)))?;
        if auth_type != AuthType::OAuth2 {
            return Ok(auth);
        }

        let token = auth
            .oauth2_token()
            .map_err(|e| AuthorizationError::Refresh(format!("stored token is unreadable: {e}")))?;
        if !token.is_expired(Utc::now()) {
            return Ok(auth);
        }

        let refreshed = match self.oauth.oauth2_refresh(auth.vendor, &token).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                counter!("pipes_token_refresh_total", "result" => "failure").increment(1);
                warn!(error = %err, "oauth2 refresh failed");
                return Err(AuthorizationError::Refresh(err.to_string()));
            }
        };

        let mut updated = auth;
        updated
            .set_oauth2_token(&refreshed)
            .map_err(|e| AuthorizationError::Refresh(e.to_string()))?;
        self.repo
            .save(&updated)
            .await
            .map_err(|e| AuthorizationError::Refresh(e.to_string()))?;

        counter!("pipes_token_refresh_total", "result" => "success").increment(1);
        info!("oauth2 token refreshed");
        Ok(updated)
    }

    /// Completes the vendor OAuth flow and stores the resulting token.
    #[instrument(skip(self, workspace_token, params))]
    pub async fn create(
        &self,
        workspace_id: i64,
        vendor: Vendor,
        workspace_token: &str,
        params: &AuthParams,
    ) -> Result<(), AuthorizationError> {
        let auth_type = self
            .catalog
            .auth_type(vendor)
            .ok_or(AuthorizationError::UnknownIntegration(vendor))?;

        let mut auth = Authorization::new(workspace_id, vendor, workspace_token);
        match auth_type {
            AuthType::OAuth1 => {
                let token = self
                    .oauth
                    .oauth1_exchange(vendor, &params.account_name, &params.token, &params.verifier)
                    .await?;
                auth.set_oauth1_token(&token)?;
            }
            AuthType::OAuth2 => {
                if params.code.is_empty() {
                    return Err(AuthorizationError::InvalidParameters("missing code".to_string()));
                }
                let token = self.oauth.oauth2_exchange(vendor, &params.code).await?;
                auth.set_oauth2_token(&token)?;
            }
        }

        self.repo.save(&auth).await?;
        info!("authorization created");
        Ok(())
    }

    /// Removes the authorization together with every pipe, status and id
    /// mapping of the vendor. Callers hold the tenant lock.
    pub async fn delete(&self, workspace_id: i64, vendor: Vendor) -> Result<(), AuthorizationError> {
        self.repo.delete(workspace_id, vendor).await?;
        let removed = self.pipes.delete_for_vendor(workspace_id, vendor).await?;
        let mappings = self.mappings.delete_for_vendor(workspace_id, vendor).await?;
        info!(workspace_id, %vendor, removed, mappings, "authorization deleted");
        Ok(())
    }

    /// Authorize URL for an OAuth1 vendor.
    pub async fn auth_url(
        &self,
        vendor: Vendor,
        account_name: &str,
        callback_url: &str,
    ) -> Result<String, AuthorizationError> {
        if account_name.is_empty() {
            return Err(AuthorizationError::InvalidParameters(
                "Missing or invalid account_name".to_string(),
            ));
        }
        if callback_url.is_empty() {
            return Err(AuthorizationError::InvalidParameters(
                "Missing or invalid callback_url".to_string(),
            ));
        }
        match self.catalog.auth_type(vendor) {
            Some(AuthType::OAuth1) => Ok(self
                .oauth
                .oauth1_auth_url(vendor, account_name, callback_url)
                .await?),
            Some(AuthType::OAuth2) => Err(AuthorizationError::InvalidParameters(format!(
                "{vendor} does not use OAuth1"
            ))),
            None => Err(AuthorizationError::UnknownIntegration(vendor)),
        }
    }

    pub async fn authorized_vendors(&self, workspace_id: i64) -> Result<Vec<Vendor>, AuthorizationError> {
        Ok(self.repo.authorized_vendors(workspace_id).await?)
    }
}
