//! Central platform API boundary.
//!
//! [`PlatformClient`] resolves workspaces and opens per-token
//! [`PlatformSession`]s; sessions perform bulk imports and read time entries.

pub mod client;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use client::HttpPlatformClient;
pub use types::{Account, Client, Mapped, Project, Staged, Task, TimeEntry, User};

/// Serialized task batches are kept under this size.
pub const MAX_PAYLOAD_SIZE_BYTES: usize = 800_000;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} failed with status code {status}")]
    Status { endpoint: String, status: u16 },
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

impl PlatformError {
    pub fn is_parse_error(&self) -> bool {
        match self {
            PlatformError::Decode { .. } => true,
            PlatformError::Http(err) => err.is_decode(),
            _ => false,
        }
    }
}

/// Outcome of a bulk import call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    /// `(foreign_id, platform_id)` for every record the platform accepted.
    pub mapped: Vec<(String, i64)>,
    pub notifications: Vec<String>,
    pub count: usize,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Liveness of the platform API; used by the readiness probe.
    async fn ping(&self) -> Result<(), PlatformError>;

    /// Workspace owning `token`.
    async fn workspace_id(&self, token: &str) -> Result<i64, PlatformError>;

    fn authenticate(&self, token: &str) -> Box<dyn PlatformSession>;
}

#[async_trait]
pub trait PlatformSession: Send + Sync {
    async fn post_users(&self, users: &[User]) -> Result<ImportResult, PlatformError>;

    async fn post_clients(&self, clients: &[Client]) -> Result<ImportResult, PlatformError>;

    async fn post_projects(&self, projects: &[Project]) -> Result<ImportResult, PlatformError>;

    async fn post_tasks(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError>;

    async fn post_todo_lists(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError>;

    async fn time_entries(
        &self,
        since: DateTime<Utc>,
        user_ids: &[i64],
        project_ids: &[i64],
    ) -> Result<Vec<TimeEntry>, PlatformError>;
}

/// Bytes of `{"tasks":[` and `]}` around the encoded tasks.
const BATCH_ENVELOPE_BYTES: usize = 12;

/// Splits `tasks` into at least `min_split` batches so that each serialized
/// batch stays under [`MAX_PAYLOAD_SIZE_BYTES`]. A single oversized task is
/// still sent alone. Each task is encoded once and batches fill greedily in
/// order.
pub fn adjust_request_size(tasks: &[Task], min_split: usize) -> Result<Vec<Vec<Task>>, PlatformError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let per_batch = tasks.len().div_ceil(min_split.max(1));
    let mut batches: Vec<Vec<Task>> = Vec::new();
    let mut current: Vec<Task> = Vec::new();
    let mut current_size = BATCH_ENVELOPE_BYTES;
    for task in tasks {
        let size = serde_json::to_vec(task).map_err(PlatformError::Encode)?.len();
        // One separating comma per task after the first.
        let added = size + usize::from(!current.is_empty());
        let full = current.len() >= per_batch || current_size + added > MAX_PAYLOAD_SIZE_BYTES;
        if full && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_size = BATCH_ENVELOPE_BYTES;
        }
        current_size += size + usize::from(!current.is_empty());
        current.push(task.clone());
    }
    batches.push(current);
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct TaskBatch<'a> {
        tasks: &'a [Task],
    }

    fn task(i: usize, name_len: usize) -> Task {
        Task {
            name: "x".repeat(name_len),
            active: true,
            foreign_id: i.to_string(),
            ..Task::default()
        }
    }

    #[test]
    fn small_lists_stay_in_one_batch() {
        let tasks: Vec<Task> = (0..10).map(|i| task(i, 10)).collect();
        let batches = adjust_request_size(&tasks, 1).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
    }

    #[test]
    fn large_lists_split_under_limit_and_keep_order() {
        let tasks: Vec<Task> = (0..5).map(|i| task(i, 300_000)).collect();
        let batches = adjust_request_size(&tasks, 1).unwrap();
        assert!(batches.len() >= 3);
        for batch in &batches {
            let size = serde_json::to_vec(&TaskBatch { tasks: batch }).unwrap().len();
            assert!(size <= MAX_PAYLOAD_SIZE_BYTES || batch.len() == 1);
        }
        let flattened: Vec<String> = batches.concat().into_iter().map(|t| t.foreign_id).collect();
        assert_eq!(flattened, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn batch_size_estimate_matches_the_encoded_body() {
        let tasks: Vec<Task> = (0..4).map(|i| task(i, 20)).collect();
        let estimated = BATCH_ENVELOPE_BYTES
            + tasks
                .iter()
                .map(|t| serde_json::to_vec(t).unwrap().len())
                .sum::<usize>()
            + (tasks.len() - 1);
        let encoded = serde_json::to_vec(&TaskBatch { tasks: &tasks }).unwrap().len();
        assert_eq!(estimated, encoded);
    }

    #[test]
    fn min_split_is_honoured_for_small_lists() {
        let tasks: Vec<Task> = (0..7).map(|i| task(i, 10)).collect();
        let batches = adjust_request_size(&tasks, 3).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
    }

    #[test]
    fn oversized_task_is_sent_alone() {
        let tasks = vec![task(0, 10), task(1, MAX_PAYLOAD_SIZE_BYTES), task(2, 10)];
        let batches = adjust_request_size(&tasks, 1).unwrap();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![1, 1, 1]);
    }

    #[test]
    fn many_tasks_are_packed_into_few_batches() {
        let tasks: Vec<Task> = (0..2_000).map(|i| task(i, 1_000)).collect();
        let batches = adjust_request_size(&tasks, 1).unwrap();
        assert!(batches.len() <= 4);
        for batch in &batches {
            let size = serde_json::to_vec(&TaskBatch { tasks: batch }).unwrap().len();
            assert!(size <= MAX_PAYLOAD_SIZE_BYTES);
        }
        assert_eq!(batches.concat().len(), 2_000);
    }

    #[test]
    fn empty_list_produces_no_batches() {
        assert!(adjust_request_size(&[], 1).unwrap().is_empty());
    }
}
