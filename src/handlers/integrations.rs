//! # Integration Handlers
//!
//! Catalog listing, vendor authorizations and the staged users/accounts
//! pickers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{parse_vendor, respond};
use crate::auth::WorkspaceContext;
use crate::authorization::AuthParams;
use crate::error::ApiError;
use crate::platform::{Account, User};
use crate::server::AppState;
use crate::service::IntegrationView;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ForceQuery {
    /// Drop the staged batch and fetch again
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthUrlQuery {
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub callback_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccountsResponse {
    pub accounts: Vec<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations",
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Integrations with workspace state", body = [IntegrationView]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
) -> Result<Json<Vec<IntegrationView>>, ApiError> {
    Ok(Json(
        state.service.integrations(workspace.workspace_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/{vendor}/users",
    params(("vendor" = String, Path, description = "Integration id"), ForceQuery),
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Staged vendor users", body = UsersResponse),
        (status = 204, description = "Users are being fetched"),
        (status = 400, description = "Not authorized or users pipe not configured", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn service_users(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path(vendor): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<Response, ApiError> {
    let vendor = parse_vendor(&vendor)?;
    let users = state
        .service
        .service_users(workspace.workspace_id, vendor, query.force)
        .await
        .map(|staged| {
            Json(UsersResponse {
                users: staged.items,
                error: staged.error,
            })
        });
    respond(users)
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/{vendor}/accounts",
    params(("vendor" = String, Path, description = "Integration id"), ForceQuery),
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Staged vendor accounts", body = AccountsResponse),
        (status = 204, description = "Accounts are being fetched"),
        (status = 400, description = "Not authorized or refresh failed", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn service_accounts(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path(vendor): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<Response, ApiError> {
    let vendor = parse_vendor(&vendor)?;
    let accounts = state
        .service
        .service_accounts(workspace.workspace_id, vendor, query.force)
        .await
        .map(|staged| {
            Json(AccountsResponse {
                accounts: staged.items,
                error: staged.error,
            })
        });
    respond(accounts)
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/{vendor}/auth_url",
    params(("vendor" = String, Path, description = "OAuth1 integration id"), AuthUrlQuery),
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Vendor authorize URL", body = AuthUrlResponse),
        (status = 400, description = "Missing account name or callback", body = ApiError)
    ),
    tag = "authorizations"
)]
pub async fn auth_url(
    State(state): State<AppState>,
    _workspace: WorkspaceContext,
    Path(vendor): Path<String>,
    Query(query): Query<AuthUrlQuery>,
) -> Result<Json<AuthUrlResponse>, ApiError> {
    let vendor = parse_vendor(&vendor)?;
    let auth_url = state
        .service
        .auth_url(vendor, &query.account_name, &query.callback_url)
        .await?;
    Ok(Json(AuthUrlResponse { auth_url }))
}

#[utoipa::path(
    post,
    path = "/api/v1/integrations/{vendor}/authorizations",
    params(("vendor" = String, Path, description = "Integration id")),
    request_body = AuthParams,
    security(("api_token" = [])),
    responses(
        (status = 204, description = "Authorization stored"),
        (status = 400, description = "Exchange parameters missing", body = ApiError)
    ),
    tag = "authorizations"
)]
pub async fn create_authorization(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path(vendor): Path<String>,
    payload: Result<Json<AuthParams>, axum::extract::rejection::JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let vendor = parse_vendor(&vendor)?;
    let Json(params) = payload?;
    state
        .service
        .create_authorization(workspace.workspace_id, vendor, &workspace.token, &params)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/integrations/{vendor}/authorizations",
    params(("vendor" = String, Path, description = "Integration id")),
    security(("api_token" = [])),
    responses((status = 204, description = "Authorization and its pipes deleted")),
    tag = "authorizations"
)]
pub async fn delete_authorization(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path(vendor): Path<String>,
) -> Result<StatusCode, ApiError> {
    let vendor = parse_vendor(&vendor)?;
    state
        .service
        .delete_authorization(workspace.workspace_id, vendor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
