//! Pipe domain types.
//!
//! A pipe is the sync configuration for one entity type of one vendor inside
//! one workspace. Its storage key is `"<vendor>:<pipe>"`.

pub mod id_mapping;
pub mod status;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::PipeError;
use crate::integrations::Vendor;

pub use id_mapping::{IdMapping, ReversedIdMapping};
pub use status::{ObjectCount, RunState, Stage, Status};

/// Entity type synchronized by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipeId {
    Users,
    Clients,
    Projects,
    Tasks,
    #[serde(rename = "todolists")]
    TodoLists,
    TimeEntries,
}

impl PipeId {
    pub const ALL: [PipeId; 6] = [
        PipeId::Users,
        PipeId::Clients,
        PipeId::Projects,
        PipeId::Tasks,
        PipeId::TodoLists,
        PipeId::TimeEntries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipeId::Users => "users",
            PipeId::Clients => "clients",
            PipeId::Projects => "projects",
            PipeId::Tasks => "tasks",
            PipeId::TodoLists => "todolists",
            PipeId::TimeEntries => "time_entries",
        }
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipeId {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipeId::ALL
            .into_iter()
            .find(|pipe| pipe.as_str() == s)
            .ok_or_else(|| PipeError::UnknownPipe(s.to_string()))
    }
}

/// Storage key shared by pipes, statuses and mappings: `"<vendor>:<pipe>"`.
pub fn pipes_key(vendor: Vendor, pipe: PipeId) -> String {
    format!("{}:{}", vendor, pipe)
}

/// Which staged users to import and whether to invite them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsersSelector {
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default, alias = "sendInvites")]
    pub send_invites: bool,
}

impl UsersSelector {
    /// Parses a run payload for the users pipe.
    ///
    /// Rejects empty bodies, malformed JSON and selectors without ids.
    pub fn parse(payload: &[u8]) -> Result<Self, PipeError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(PipeError::invalid("Missing request payload"));
        }
        let selector: UsersSelector = serde_json::from_slice(payload)
            .map_err(|_| PipeError::invalid("Invalid users selector payload"))?;
        if selector.ids.is_empty() {
            return Err(PipeError::invalid("Missing user ids in request payload"));
        }
        Ok(selector)
    }
}

/// A configured (or candidate) pipe with its latest status.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Pipe {
    pub id: PipeId,
    #[serde(skip)]
    pub workspace_id: i64,
    #[serde(skip)]
    pub vendor: Vendor,
    pub configured: bool,
    pub automatic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_params: Option<Value>,
    #[serde(skip)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Transient run input for the users pipe; never persisted.
    #[serde(skip)]
    pub users_selector: Option<UsersSelector>,
    #[serde(rename = "pipe_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Pipe {
    pub fn new(workspace_id: i64, vendor: Vendor, id: PipeId) -> Self {
        Self {
            id,
            workspace_id,
            vendor,
            configured: false,
            automatic: false,
            service_params: None,
            last_sync: None,
            users_selector: None,
            status: None,
        }
    }

    pub fn key(&self) -> String {
        pipes_key(self.vendor, self.id)
    }

    /// Params handed to the adapter's `set_params`; `null` when unset.
    pub fn params(&self) -> Value {
        self.service_params.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_ids_round_trip_through_strings() {
        for pipe in PipeId::ALL {
            assert_eq!(pipe.as_str().parse::<PipeId>().unwrap(), pipe);
        }
        assert_eq!(PipeId::TodoLists.as_str(), "todolists");
        assert!(matches!(
            "invoices".parse::<PipeId>(),
            Err(PipeError::UnknownPipe(_))
        ));
    }

    #[test]
    fn pipes_key_joins_vendor_and_pipe() {
        assert_eq!(pipes_key(Vendor::Asana, PipeId::TimeEntries), "asana:time_entries");
    }

    #[test]
    fn users_selector_requires_payload_and_ids() {
        assert_eq!(
            UsersSelector::parse(b"").unwrap_err(),
            PipeError::invalid("Missing request payload")
        );
        assert!(UsersSelector::parse(b"{not json").is_err());
        assert!(UsersSelector::parse(br#"{"ids":[]}"#).is_err());

        let selector = UsersSelector::parse(br#"{"ids":[42],"send_invites":true}"#).unwrap();
        assert_eq!(selector.ids, vec![42]);
        assert!(selector.send_invites);
    }

    #[test]
    fn users_selector_accepts_camel_case_invites() {
        let selector = UsersSelector::parse(br#"{"ids":[1],"sendInvites":true}"#).unwrap();
        assert!(selector.send_invites);
    }
}
