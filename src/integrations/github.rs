//! GitHub integration
//!
//! Repositories the authorized user can access are imported as projects.
//! GitHub has no users, clients or tasks to offer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::integrations::{AdapterError, Vendor, VendorAdapter};
use crate::oauth::OAuth2Token;
use crate::platform::{Account, Client, Project, Task, TimeEntry, User};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: i64,
    name: String,
}

pub struct GitHubAdapter {
    workspace_id: i64,
    http: reqwest::Client,
    api_base: String,
    token: Option<OAuth2Token>,
}

impl GitHubAdapter {
    pub fn new(workspace_id: i64, http: reqwest::Client) -> Self {
        Self {
            workspace_id,
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn access_token(&self) -> Result<&str, AdapterError> {
        self.token
            .as_ref()
            .map(|t| t.access_token.as_str())
            .ok_or_else(|| AdapterError::Unauthorized("missing GitHub token".to_string()))
    }

    async fn repos_page(&self, page: u32) -> Result<Vec<GitHubRepo>, AdapterError> {
        let response = self
            .http
            .get(format!("{}/user/repos", self.api_base))
            .query(&[("per_page", PER_PAGE), ("page", page)])
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token()?))
            .header(USER_AGENT, "pipes-sync")
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AdapterError::Unauthorized(
                "GitHub rejected the access token".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| AdapterError::decode("GitHub repositories", e))
    }
}

#[async_trait]
impl VendorAdapter for GitHubAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::GitHub
    }

    fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    fn set_credentials(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        let token: OAuth2Token =
            serde_json::from_slice(data).map_err(|e| AdapterError::decode("GitHub token", e))?;
        self.token = Some(token);
        Ok(())
    }

    // No parameters to validate.
    fn set_params(&mut self, _params: &Value) -> Result<(), AdapterError> {
        Ok(())
    }

    fn set_since(&mut self, _since: Option<DateTime<Utc>>) {}

    async fn accounts(&self) -> Result<Vec<Account>, AdapterError> {
        Ok(vec![Account {
            id: 1,
            name: "Self".to_string(),
        }])
    }

    async fn users(&self) -> Result<Vec<User>, AdapterError> {
        Ok(Vec::new())
    }

    async fn clients(&self) -> Result<Vec<Client>, AdapterError> {
        Ok(Vec::new())
    }

    async fn projects(&self) -> Result<Vec<Project>, AdapterError> {
        let mut projects = Vec::new();
        let mut page = 1;
        loop {
            let repos = self.repos_page(page).await?;
            let last_page = repos.len() < PER_PAGE as usize;
            projects.extend(repos.into_iter().map(|repo| Project {
                name: repo.name,
                active: true,
                foreign_id: repo.id.to_string(),
                ..Project::default()
            }));
            if last_page {
                break;
            }
            page += 1;
        }
        debug!(workspace_id = self.workspace_id, count = projects.len(), "fetched GitHub repositories");
        Ok(projects)
    }

    async fn tasks(&self) -> Result<Vec<Task>, AdapterError> {
        Ok(Vec::new())
    }

    async fn todo_lists(&self) -> Result<Vec<Task>, AdapterError> {
        Ok(Vec::new())
    }

    async fn export_time_entry(&self, _entry: &TimeEntry) -> Result<i64, AdapterError> {
        Err(AdapterError::Unsupported("time entry export"))
    }
}
