//! # Pipe Handlers
//!
//! Configuration, runs, logs and mapping resets for a single pipe.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::{parse_target, respond};
use crate::auth::WorkspaceContext;
use crate::error::{ApiError, PipeError};
use crate::pipes::Pipe;
use crate::scheduler::RunTicket;
use crate::server::AppState;
use crate::service::PipeUpdate;

/// Acknowledgment of a run request.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunResponse {
    pub status: RunTicket,
}

/// Request body as JSON; an empty body is `null`.
fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| PipeError::invalid(format!("Invalid JSON: {err}")).into())
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}",
    params(
        ("vendor" = String, Path, description = "Integration id, e.g. asana"),
        ("pipe" = String, Path, description = "Pipe id, e.g. projects")
    ),
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Pipe with its latest status", body = Pipe),
        (status = 400, description = "Unknown integration or pipe", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn get_pipe(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
) -> Result<Json<Pipe>, ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    Ok(Json(
        state
            .service
            .get_pipe(workspace.workspace_id, vendor, pipe)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    request_body(content = Object, description = "Integration-specific pipe parameters"),
    security(("api_token" = [])),
    responses(
        (status = 201, description = "Pipe configured", body = Pipe),
        (status = 400, description = "Parameters rejected", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn create_pipe(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Pipe>), ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    let params = json_body(&body)?;
    let pipe = state
        .service
        .create_pipe(workspace.workspace_id, vendor, pipe, params)
        .await?;
    Ok((StatusCode::CREATED, Json(pipe)))
}

#[utoipa::path(
    put,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    request_body = PipeUpdate,
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Pipe updated", body = Pipe),
        (status = 400, description = "Pipe not configured or parameters rejected", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn update_pipe(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Pipe>, ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    let update: PipeUpdate = match json_body(&body)? {
        Value::Null => PipeUpdate::default(),
        value => serde_json::from_value(value)
            .map_err(|err| PipeError::invalid(format!("Invalid pipe update: {err}")))?,
    };
    Ok(Json(
        state
            .service
            .update_pipe(workspace.workspace_id, vendor, pipe, update)
            .await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    security(("api_token" = [])),
    responses(
        (status = 204, description = "Pipe deleted"),
        (status = 400, description = "Pipe not configured", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn delete_pipe(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    state
        .service
        .delete_pipe(workspace.workspace_id, vendor, pipe)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}/run",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    request_body(
        content = crate::pipes::UsersSelector,
        description = "Required for the users pipe; ignored otherwise"
    ),
    security(("api_token" = [])),
    responses(
        (status = 202, description = "Run accepted or queued", body = RunResponse),
        (status = 400, description = "Pipe not configured or payload invalid", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn run_pipe(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    let status = state
        .service
        .run_pipe(workspace.workspace_id, vendor, pipe, &body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(RunResponse { status })))
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}/log",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    security(("api_token" = [])),
    responses(
        (status = 200, description = "Plain-text log of the latest run", body = String, content_type = "text/plain"),
        (status = 204, description = "Pipe has not run yet")
    ),
    tag = "pipes"
)]
pub async fn pipe_log(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    let log = state
        .service
        .pipe_log(workspace.workspace_id, vendor, pipe)
        .await
        .map(|log| ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], log).into_response());
    respond(log)
}

#[utoipa::path(
    delete,
    path = "/api/v1/integrations/{vendor}/pipes/{pipe}/idmappings",
    params(
        ("vendor" = String, Path, description = "Integration id"),
        ("pipe" = String, Path, description = "Pipe id")
    ),
    security(("api_token" = [])),
    responses(
        (status = 204, description = "Mappings cleared"),
        (status = 400, description = "Pipe not configured", body = ApiError)
    ),
    tag = "pipes"
)]
pub async fn clear_id_mappings(
    State(state): State<AppState>,
    workspace: WorkspaceContext,
    Path((vendor, pipe)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let (vendor, pipe) = parse_target(&vendor, &pipe)?;
    state
        .service
        .clear_id_mappings(workspace.workspace_id, vendor, pipe)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
