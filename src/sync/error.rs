//! Run-internal errors and their public classification.

use sea_orm::DbErr;
use thiserror::Error;

use crate::authorization::AuthorizationError;
use crate::error::PipeError;
use crate::integrations::{AdapterError, RegistryError};
use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A post stage found nothing staged, e.g. "service projects not found".
    #[error("{0}")]
    Missing(String),
}

impl SyncError {
    /// Folds the error into the kind recorded on the status and returned to
    /// callers. Every decode failure becomes [`PipeError::Parse`].
    pub fn classify(self) -> PipeError {
        match self {
            SyncError::Adapter(err) if err.is_parse_error() => PipeError::Parse,
            SyncError::Platform(err) if err.is_parse_error() => PipeError::Parse,
            SyncError::Adapter(AdapterError::InvalidParams(message)) => {
                PipeError::InvalidParameters(message)
            }
            SyncError::Authorization(err) => err.into(),
            SyncError::Registry(RegistryError::MissingAdapter(vendor)) => {
                PipeError::UnknownVendor(vendor.to_string())
            }
            other => PipeError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PARSE_ERROR_MESSAGE;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[test]
    fn decode_failures_are_masked() {
        let adapter = SyncError::from(AdapterError::decode("asana projects", json_error()));
        assert_eq!(adapter.classify().to_string(), PARSE_ERROR_MESSAGE);

        let platform = SyncError::from(PlatformError::Decode {
            endpoint: "/api/pipes/projects".into(),
            source: json_error(),
        });
        assert_eq!(platform.classify(), PipeError::Parse);
    }

    #[test]
    fn other_failures_keep_their_message() {
        let status = SyncError::from(PlatformError::Status {
            endpoint: "/api/pipes/users".into(),
            status: 500,
        });
        assert_eq!(
            status.classify().to_string(),
            "/api/pipes/users failed with status code 500"
        );
        assert_eq!(
            SyncError::Missing("service tasks not found".into())
                .classify()
                .to_string(),
            "service tasks not found"
        );
    }

    #[test]
    fn authorization_errors_keep_their_kind() {
        let err = SyncError::from(AuthorizationError::Refresh("expired".into()));
        assert!(matches!(err.classify(), PipeError::Refresh(_)));
    }
}
