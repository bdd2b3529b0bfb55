//! # Error Handling
//!
//! Domain error kinds ([`PipeError`]) and the JSON error body the API
//! renders them as ([`ApiError`]).

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Message surfaced for any vendor or platform payload that failed to decode.
pub const PARSE_ERROR_MESSAGE: &str =
    "failed to parse response from service, please contact support";

/// Public error kinds produced by pipe operations.
///
/// Run-internal failures are folded into one of these by
/// [`crate::sync::SyncError::classify`]; API operations return them directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("pipe is not configured")]
    NotConfigured,
    #[error("{0}")]
    InvalidParameters(String),
    #[error("{message}")]
    Load { message: String, not_found: bool },
    #[error("oauth authorization refresh failed, please reauthorize: {0}")]
    Refresh(String),
    #[error("no content")]
    NoContent,
    #[error("{}", PARSE_ERROR_MESSAGE)]
    Parse,
    #[error("unknown service '{0}'")]
    UnknownVendor(String),
    #[error("unknown pipe '{0}'")]
    UnknownPipe(String),
    #[error("{0}")]
    Internal(String),
}

impl PipeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(message.to_string())
    }

    /// Authorization row does not exist for the workspace and vendor.
    pub fn authorization_not_found() -> Self {
        Self::Load {
            message: "authorization not found".to_string(),
            not_found: true,
        }
    }
}

impl From<sea_orm::DbErr> for PipeError {
    fn from(err: sea_orm::DbErr) -> Self {
        tracing::error!(error = %err, "database error in pipe operation");
        Self::Internal(err.to_string())
    }
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Stable machine-readable code, e.g. `PIPE_NOT_CONFIGURED`
    pub code: String,
    pub message: String,
    /// Trace id of the failed request, for support lookups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            trace_id: telemetry::current_trace_id(),
        }
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(&self)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Basic realm=\"pipes\""),
            );
        }
        response
    }
}

impl From<PipeError> for ApiError {
    fn from(error: PipeError) -> Self {
        let message = error.to_string();
        match error {
            PipeError::NotConfigured => {
                Self::new(StatusCode::BAD_REQUEST, "PIPE_NOT_CONFIGURED", message)
            }
            PipeError::InvalidParameters(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            PipeError::Load {
                not_found: true, ..
            } => Self::new(StatusCode::BAD_REQUEST, "AUTHORIZATION_NOT_FOUND", message),
            PipeError::Load { .. } => {
                tracing::error!(%message, "failed to load authorization");
                Self::internal()
            }
            PipeError::Refresh(_) => Self::new(StatusCode::BAD_REQUEST, "REFRESH_FAILED", message),
            // Handlers answer NoContent with an empty 204 before it gets here.
            PipeError::NoContent => Self::new(StatusCode::NO_CONTENT, "NO_CONTENT", message),
            PipeError::Parse => Self::new(StatusCode::BAD_GATEWAY, "PARSE_FAILED", message),
            PipeError::UnknownVendor(_) | PipeError::UnknownPipe(_) => {
                Self::new(StatusCode::BAD_REQUEST, "NOT_FOUND", message)
            }
            PipeError::Internal(_) => {
                tracing::error!(%message, "internal error");
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonSyntaxError(err) => format!("Malformed JSON body: {err}"),
            JsonRejection::JsonDataError(err) => format!("Unexpected JSON body: {err}"),
            JsonRejection::MissingJsonContentType(_) => {
                "Expected Content-Type: application/json".to_string()
            }
            _ => "Invalid request body".to_string(),
        };
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

/// 401 with the given reason.
pub fn unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_maps_to_bad_request() {
        let error: ApiError = PipeError::NotConfigured.into();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "PIPE_NOT_CONFIGURED");
    }

    #[test]
    fn invalid_parameters_keeps_message() {
        let error: ApiError = PipeError::invalid("Missing request payload").into();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, "Missing request payload");
    }

    #[test]
    fn load_error_distinguishes_missing_from_failure() {
        let missing: ApiError = PipeError::authorization_not_found().into();
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
        assert_eq!(missing.code, "AUTHORIZATION_NOT_FOUND");

        let broken: ApiError = PipeError::Load {
            message: "decrypt failed".to_string(),
            not_found: false,
        }
        .into();
        assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!broken.message.contains("decrypt"));
    }

    #[test]
    fn parse_error_uses_generic_message() {
        let error: ApiError = PipeError::Parse.into();
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.message, PARSE_ERROR_MESSAGE);
    }

    #[test]
    fn internal_error_hides_details() {
        let error: ApiError = PipeError::internal("connection reset by peer").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "An internal error occurred");
    }

    #[test]
    fn unauthorized_response_asks_for_basic_auth() {
        let response = unauthorized("Missing API token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
