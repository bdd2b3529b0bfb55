//! Asana integration
//!
//! Pipes are scoped to one Asana workspace, chosen through the
//! `account_id` pipe parameter. List endpoints are paginated with an
//! opaque `offset` cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::integrations::{AdapterError, Vendor, VendorAdapter};
use crate::oauth::OAuth2Token;
use crate::platform::{Account, Client, Project, Task, TimeEntry, User};

const DEFAULT_API_BASE: &str = "https://app.asana.com/api/1.0";
const PAGE_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Deserialize)]
struct AsanaWorkspace {
    gid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AsanaUser {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsanaProject {
    gid: String,
    name: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct AsanaTask {
    gid: String,
    name: String,
    #[serde(default)]
    completed: bool,
}

/// Pipe parameters accepted by the Asana adapter.
#[derive(Debug, Clone, Deserialize)]
struct AsanaParams {
    account_id: i64,
}

pub struct AsanaAdapter {
    workspace_id: i64,
    http: reqwest::Client,
    api_base: String,
    token: Option<OAuth2Token>,
    account_id: Option<i64>,
    since: Option<DateTime<Utc>>,
}

impl AsanaAdapter {
    pub fn new(workspace_id: i64, http: reqwest::Client) -> Self {
        Self {
            workspace_id,
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            account_id: None,
            since: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn account_id(&self) -> Result<i64, AdapterError> {
        self.account_id
            .ok_or_else(|| AdapterError::InvalidParams("account_id is not set".to_string()))
    }

    /// Collects every page of `path`.
    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>, AdapterError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| AdapterError::Unauthorized("missing Asana token".to_string()))?;

        let mut items = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![("limit", PAGE_LIMIT.to_string())];
            query.extend(extra.iter().cloned());
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let response = self
                .http
                .get(format!("{}{}", self.api_base, path))
                .query(&query)
                .header(AUTHORIZATION, format!("Bearer {}", token.access_token))
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AdapterError::Unauthorized(
                    "Asana rejected the access token".to_string(),
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
            let page: Page<T> =
                serde_json::from_slice(&bytes).map_err(|e| AdapterError::decode(path, e))?;
            items.extend(page.data);
            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => break,
            }
        }
        debug!(path, count = items.len(), "fetched Asana records");
        Ok(items)
    }

    fn since_filter(&self) -> Vec<(&'static str, String)> {
        self.since
            .map(|since| vec![("modified_since", since.to_rfc3339())])
            .unwrap_or_default()
    }
}

#[async_trait]
impl VendorAdapter for AsanaAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Asana
    }

    fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    fn set_credentials(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        let token: OAuth2Token =
            serde_json::from_slice(data).map_err(|e| AdapterError::decode("Asana token", e))?;
        self.token = Some(token);
        Ok(())
    }

    fn set_params(&mut self, params: &Value) -> Result<(), AdapterError> {
        let parsed: AsanaParams = serde_json::from_value(params.clone())
            .map_err(|_| AdapterError::InvalidParams("Missing account_id".to_string()))?;
        if parsed.account_id <= 0 {
            return Err(AdapterError::InvalidParams("Missing account_id".to_string()));
        }
        self.account_id = Some(parsed.account_id);
        Ok(())
    }

    fn set_since(&mut self, since: Option<DateTime<Utc>>) {
        self.since = since;
    }

    async fn accounts(&self) -> Result<Vec<Account>, AdapterError> {
        let workspaces: Vec<AsanaWorkspace> = self.list("/workspaces", &[]).await?;
        Ok(workspaces
            .into_iter()
            .filter_map(|ws| {
                ws.gid.parse().ok().map(|id| Account { id, name: ws.name })
            })
            .collect())
    }

    async fn users(&self) -> Result<Vec<User>, AdapterError> {
        let path = format!("/workspaces/{}/users", self.account_id()?);
        let users: Vec<AsanaUser> = self
            .list(&path, &[("opt_fields", "name,email".to_string())])
            .await?;
        Ok(users
            .into_iter()
            .map(|user| User {
                email: user.email.unwrap_or_default(),
                name: user.name,
                foreign_id: user.gid,
                ..User::default()
            })
            .collect())
    }

    async fn clients(&self) -> Result<Vec<Client>, AdapterError> {
        Ok(Vec::new())
    }

    async fn projects(&self) -> Result<Vec<Project>, AdapterError> {
        let path = format!("/workspaces/{}/projects", self.account_id()?);
        let projects: Vec<AsanaProject> = self
            .list(&path, &[("opt_fields", "name,archived".to_string())])
            .await?;
        Ok(projects
            .into_iter()
            .map(|project| Project {
                name: project.name,
                active: !project.archived,
                foreign_id: project.gid,
                ..Project::default()
            })
            .collect())
    }

    async fn tasks(&self) -> Result<Vec<Task>, AdapterError> {
        let projects = self.projects().await?;
        let mut query = vec![("opt_fields", "name,completed".to_string())];
        query.extend(self.since_filter());

        let mut tasks = Vec::new();
        for project in projects {
            let path = format!("/projects/{}/tasks", project.foreign_id);
            let fetched: Vec<AsanaTask> = self.list(&path, &query).await?;
            tasks.extend(fetched.into_iter().map(|task| Task {
                name: task.name,
                active: !task.completed,
                foreign_id: task.gid,
                foreign_project_id: Some(project.foreign_id.clone()),
                ..Task::default()
            }));
        }
        Ok(tasks)
    }

    async fn todo_lists(&self) -> Result<Vec<Task>, AdapterError> {
        Ok(Vec::new())
    }

    async fn export_time_entry(&self, _entry: &TimeEntry) -> Result<i64, AdapterError> {
        Err(AdapterError::Unsupported("time entry export"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_require_account_id() {
        let mut adapter = AsanaAdapter::new(1, reqwest::Client::new());
        assert!(matches!(
            adapter.set_params(&Value::Null),
            Err(AdapterError::InvalidParams(_))
        ));
        assert!(matches!(
            adapter.set_params(&json!({"foo": 1})),
            Err(AdapterError::InvalidParams(_))
        ));
        assert!(adapter.set_params(&json!({"account_id": 0})).is_err());

        adapter.set_params(&json!({"account_id": 1207})).unwrap();
        assert_eq!(adapter.account_id().unwrap(), 1207);
    }

    #[tokio::test]
    async fn users_need_an_account() {
        let mut adapter = AsanaAdapter::new(1, reqwest::Client::new());
        adapter
            .set_credentials(br#"{"access_token":"t","token_type":"Bearer"}"#)
            .unwrap();
        assert!(matches!(
            adapter.users().await,
            Err(AdapterError::InvalidParams(_))
        ));
    }

    #[test]
    fn since_becomes_modified_since_filter() {
        let mut adapter = AsanaAdapter::new(1, reqwest::Client::new());
        assert!(adapter.since_filter().is_empty());
        let since = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        adapter.set_since(Some(since));
        assert_eq!(
            adapter.since_filter(),
            vec![("modified_since", "2026-01-02T03:04:05+00:00".to_string())]
        );
    }
}
