//! Per-run status record.
//!
//! A status is replaced at the start of every run and mutated only by the
//! run that owns it. Errors and notifications are append-only until
//! [`Status::finish`] is called.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Fetching,
    Posting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ObjectCount {
    pub pipe: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Status {
    pub workspace_id: i64,
    pub key: String,
    pub run: u64,
    pub state: RunState,
    pub stage: Stage,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
    #[serde(default)]
    pub object_counts: Vec<ObjectCount>,
    pub sync_date: DateTime<Utc>,
    #[serde(default)]
    pub sync_log: String,
}

impl Status {
    /// Fresh status for a run that is starting now.
    pub fn start(
        workspace_id: i64,
        key: impl Into<String>,
        previous: Option<&Status>,
        sync_log: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            key: key.into(),
            run: Self::next_run(previous),
            state: RunState::Running,
            stage: Stage::Fetching,
            errors: Vec::new(),
            notifications: Vec::new(),
            object_counts: Vec::new(),
            sync_date: Utc::now(),
            sync_log: sync_log.into(),
        }
    }

    /// Placeholder status written when a run is queued.
    pub fn queued(workspace_id: i64, key: impl Into<String>, previous: Option<&Status>) -> Self {
        Self {
            state: RunState::Queued,
            stage: Stage::Queued,
            sync_log: previous.map(|s| s.sync_log.clone()).unwrap_or_default(),
            ..Self::start(workspace_id, key, previous, String::new())
        }
    }

    // A queued status reserves the ordinal the run will use.
    fn next_run(previous: Option<&Status>) -> u64 {
        match previous {
            Some(prev) if prev.state == RunState::Queued => prev.run,
            Some(prev) => prev.run + 1,
            None => 1,
        }
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Records a finished stage.
    pub fn complete(&mut self, pipe: &str, notifications: Vec<String>, count: usize) {
        self.notifications.extend(notifications);
        self.object_counts.push(ObjectCount {
            pipe: pipe.to_string(),
            count,
        });
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn finish(&mut self) {
        self.stage = Stage::Done;
        self.state = if self.errors.is_empty() {
            RunState::Success
        } else {
            RunState::Error
        };
    }

    /// Plain-text log served by the pipe log endpoint.
    pub fn generate_log(&self) -> String {
        let mut log = format!(
            "Log name: {}\nRun: {}\nSync date: {}\nState: {}\n",
            self.key,
            self.run,
            self.sync_date.to_rfc3339(),
            state_label(self.state),
        );
        if !self.object_counts.is_empty() {
            log.push_str("\nObjects:\n");
            for count in &self.object_counts {
                log.push_str(&format!("  {}: {}\n", count.pipe, count.count));
            }
        }
        if !self.notifications.is_empty() {
            log.push_str("\nNotifications:\n");
            for note in &self.notifications {
                log.push_str(&format!("  {}\n", note));
            }
        }
        if !self.errors.is_empty() {
            log.push_str("\nErrors:\n");
            for error in &self.errors {
                log.push_str(&format!("  {}\n", error));
            }
        }
        log
    }
}

fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Queued => "queued",
        RunState::Running => "running",
        RunState::Success => "success",
        RunState::Error => "error",
    }
}
