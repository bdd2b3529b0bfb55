//! reqwest implementation of the platform boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use super::{
    Client, ImportResult, Mapped, PlatformClient, PlatformError, PlatformSession, Project, Task,
    TimeEntry, User,
};
use crate::config::PlatformConfig;

const USER_AGENT: &str = "pipes-sync";

#[derive(Clone)]
pub struct HttpPlatformClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self::with_http_client(&config.api_url, http))
    }

    pub fn with_http_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[derive(Deserialize)]
struct WorkspaceResponse {
    workspace: WorkspaceRef,
}

#[derive(Deserialize)]
struct WorkspaceRef {
    id: i64,
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn ping(&self) -> Result<(), PlatformError> {
        let endpoint = format!("{}/api/v9/status", self.base_url);
        let response = self.http.get(&endpoint).send().await?;
        if response.status() != StatusCode::OK {
            return Err(PlatformError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn workspace_id(&self, token: &str) -> Result<i64, PlatformError> {
        let endpoint = format!("{}/api/pipes/workspace", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .basic_auth(token, Some("api_token"))
            .send()
            .await?;
        let body: WorkspaceResponse = read_json(endpoint, response).await?;
        Ok(body.workspace.id)
    }

    fn authenticate(&self, token: &str) -> Box<dyn PlatformSession> {
        Box::new(HttpPlatformSession {
            base_url: self.base_url.clone(),
            http: self.http.clone(),
            token: token.to_string(),
        })
    }
}

/// Platform calls made on behalf of one workspace token.
pub struct HttpPlatformSession {
    base_url: String,
    http: reqwest::Client,
    token: String,
}

/// Import responses are `{"<pipe>": [...], "notifications": [...]}`.
#[derive(Deserialize)]
struct ImportResponse<T> {
    #[serde(
        default = "Vec::new",
        alias = "users",
        alias = "clients",
        alias = "projects",
        alias = "tasks",
        alias = "todolists"
    )]
    items: Vec<T>,
    #[serde(default)]
    notifications: Vec<String>,
}

impl HttpPlatformSession {
    async fn post_import<T>(
        &self,
        pipe: &str,
        field: &str,
        records: &[T],
    ) -> Result<ImportResult, PlatformError>
    where
        T: Serialize + DeserializeOwned + Mapped,
    {
        let started = std::time::Instant::now();
        let endpoint = format!("{}/api/pipes/{}", self.base_url, pipe);
        let mut body = serde_json::Map::new();
        body.insert(
            field.to_string(),
            serde_json::to_value(records).map_err(PlatformError::Encode)?,
        );

        let response = self
            .http
            .post(&endpoint)
            .basic_auth(&self.token, Some("api_token"))
            .json(&body)
            .send()
            .await?;
        let parsed: ImportResponse<T> = read_json(endpoint.clone(), response).await?;
        debug!(
            endpoint = %endpoint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "platform import finished"
        );

        Ok(ImportResult {
            count: parsed.items.len(),
            mapped: parsed
                .items
                .iter()
                .map(|r| (r.foreign_id().to_string(), r.id()))
                .collect(),
            notifications: parsed.notifications,
        })
    }
}

#[async_trait]
impl PlatformSession for HttpPlatformSession {
    async fn post_users(&self, users: &[User]) -> Result<ImportResult, PlatformError> {
        self.post_import("users", "users", users).await
    }

    async fn post_clients(&self, clients: &[Client]) -> Result<ImportResult, PlatformError> {
        self.post_import("clients", "clients", clients).await
    }

    async fn post_projects(&self, projects: &[Project]) -> Result<ImportResult, PlatformError> {
        self.post_import("projects", "projects", projects).await
    }

    async fn post_tasks(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError> {
        self.post_import("tasks", "tasks", tasks).await
    }

    async fn post_todo_lists(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError> {
        self.post_import("todolists", "tasks", tasks).await
    }

    async fn time_entries(
        &self,
        since: DateTime<Utc>,
        user_ids: &[i64],
        project_ids: &[i64],
    ) -> Result<Vec<TimeEntry>, PlatformError> {
        let endpoint = format!("{}/api/pipes/time_entries", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .basic_auth(&self.token, Some("api_token"))
            .query(&[
                ("since", since.timestamp().to_string()),
                ("user_ids", join_ids(user_ids)),
                ("project_ids", join_ids(project_ids)),
            ])
            .send()
            .await?;
        read_json(endpoint, response).await
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

async fn read_json<T: DeserializeOwned>(
    endpoint: String,
    response: reqwest::Response,
) -> Result<T, PlatformError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(PlatformError::Status {
            endpoint,
            status: status.as_u16(),
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| PlatformError::Decode { endpoint, source })
}
