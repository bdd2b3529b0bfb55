//! # Workspace Authentication
//!
//! Callers authenticate with their platform API token, sent either as the
//! user part of HTTP Basic auth or as a Bearer token. The token is resolved
//! to a workspace through the platform API and cached.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lru::LruCache;

use crate::error::{ApiError, unauthorized};
use crate::platform::{PlatformClient, PlatformError};
use crate::server::AppState;

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub workspace_id: i64,
    /// Platform API token of the caller; stored with new authorizations.
    pub token: String,
}

/// Token to workspace lookups with a bounded cache.
pub struct WorkspaceResolver {
    platform: Arc<dyn PlatformClient>,
    cache: Mutex<LruCache<String, i64>>,
}

impl WorkspaceResolver {
    pub fn new(platform: Arc<dyn PlatformClient>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            platform,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cached(&self, token: &str) -> Option<i64> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(token).copied()
    }

    pub async fn resolve(&self, token: &str) -> Result<i64, ApiError> {
        if let Some(workspace_id) = self.cached(token) {
            return Ok(workspace_id);
        }

        let workspace_id = self.platform.workspace_id(token).await.map_err(|err| match err {
            PlatformError::Status { status: 401 | 403, .. } => {
                unauthorized("Invalid API token")
            }
            other => {
                tracing::warn!(error = %other, "workspace lookup failed");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Unable to verify API token",
                )
            }
        })?;

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.put(token.to_string(), workspace_id);
        Ok(workspace_id)
    }
}

/// Resolves the caller's workspace and stores a [`WorkspaceContext`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())?;
    let workspace_id = state.workspaces.resolve(&token).await?;
    tracing::debug!(workspace_id, "authenticated workspace request");

    request
        .extensions_mut()
        .insert(WorkspaceContext { workspace_id, token });
    Ok(next.run(request).await)
}

/// Platform token from `Basic base64(token:api_token)` or `Bearer token`.
fn extract_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| unauthorized("Invalid Authorization header"))?;

    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| unauthorized("Invalid basic credentials"))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| unauthorized("Invalid basic credentials"))?;
        let user = decoded.split(':').next().unwrap_or_default();
        if user.is_empty() {
            return Err(unauthorized("Missing API token"));
        }
        return Ok(user.to_string());
    }

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            return Err(unauthorized("Missing API token"));
        }
        return Ok(token.to_string());
    }

    Err(unauthorized("Authorization header must use Basic or Bearer scheme"))
}

impl<S> FromRequestParts<S> for WorkspaceContext
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<WorkspaceContext>()
            .cloned()
            .ok_or_else(|| unauthorized("Workspace authentication required"))
    }
}
