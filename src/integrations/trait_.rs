//! Vendor adapter capability
//!
//! Every vendor integration implements [`VendorAdapter`]. Adapters are created
//! per run by an [`AdapterFactory`], configured through the setters, then
//! queried by the sync stages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::integrations::Vendor;
use crate::platform::{Account, Client, Project, Task, TimeEntry, User};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request to vendor failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vendor returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("vendor rejected credentials: {0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("{0} is not supported by this integration")]
    Unsupported(&'static str),
}

impl AdapterError {
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// True when the vendor sent something that did not match the expected shape.
    pub fn is_parse_error(&self) -> bool {
        match self {
            AdapterError::Decode { .. } => true,
            AdapterError::Http(err) => err.is_decode(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn vendor(&self) -> Vendor;

    fn workspace_id(&self) -> i64;

    /// Staging and mapping key for an object type, `"<vendor>:<object>"`.
    fn key_for(&self, object: &str) -> String {
        format!("{}:{}", self.vendor(), object)
    }

    /// Installs the decrypted authorization blob.
    fn set_credentials(&mut self, data: &[u8]) -> Result<(), AdapterError>;

    /// Validates and installs pipe parameters. `Value::Null` means "none".
    fn set_params(&mut self, params: &Value) -> Result<(), AdapterError>;

    /// Restricts list calls to records modified after `since`.
    fn set_since(&mut self, since: Option<DateTime<Utc>>);

    async fn accounts(&self) -> Result<Vec<Account>, AdapterError>;

    async fn users(&self) -> Result<Vec<User>, AdapterError>;

    async fn clients(&self) -> Result<Vec<Client>, AdapterError>;

    async fn projects(&self) -> Result<Vec<Project>, AdapterError>;

    async fn tasks(&self) -> Result<Vec<Task>, AdapterError>;

    async fn todo_lists(&self) -> Result<Vec<Task>, AdapterError>;

    /// Creates or updates the entry in the vendor, returning its vendor id.
    async fn export_time_entry(&self, entry: &TimeEntry) -> Result<i64, AdapterError>;
}

/// Builds a fresh adapter for a workspace.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, workspace_id: i64) -> Box<dyn VendorAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn(i64) -> Box<dyn VendorAdapter> + Send + Sync,
{
    fn create(&self, workspace_id: i64) -> Box<dyn VendorAdapter> {
        self(workspace_id)
    }
}
