//! # API Handlers
//!
//! HTTP endpoints over [`crate::service::PipesService`]. Path segments are
//! parsed into typed vendor and pipe ids before reaching the service.

pub mod integrations;
pub mod pipes;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, PipeError};
use crate::integrations::Vendor;
use crate::pipes::PipeId;
use crate::server::AppState;

/// Liveness payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Readiness payload; `problems` lists each failing dependency.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    pub ready: bool,
    pub problems: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is alive", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pipes",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Dependencies are reachable", body = ReadyResponse),
        (status = 503, description = "A dependency is down", body = ReadyResponse)
    ),
    tag = "health"
)]
pub async fn ready(State(state): State<AppState>) -> Response {
    let problems = state.service.ready().await;
    let status = if problems.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready: problems.is_empty(),
            problems,
        }),
    )
        .into_response()
}

pub(crate) fn parse_vendor(vendor: &str) -> Result<Vendor, ApiError> {
    Ok(vendor.parse::<Vendor>()?)
}

pub(crate) fn parse_target(vendor: &str, pipe: &str) -> Result<(Vendor, PipeId), ApiError> {
    Ok((vendor.parse::<Vendor>()?, pipe.parse::<PipeId>()?))
}

/// Renders `NoContent` as an empty 204 and any other error as problem+json.
pub(crate) fn respond<T: IntoResponse>(result: Result<T, PipeError>) -> Result<Response, ApiError> {
    match result {
        Ok(body) => Ok(body.into_response()),
        Err(PipeError::NoContent) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_content_becomes_empty_204() {
        let response = respond::<Json<()>>(Err(PipeError::NoContent)).unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn unknown_path_segments_are_bad_requests() {
        let err = parse_target("jira", "users").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = parse_target("asana", "invoices").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(parse_target("asana", "todolists").is_ok());
    }
}
