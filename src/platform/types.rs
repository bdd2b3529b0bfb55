//! Entity wire types exchanged with the platform and produced by adapters.
//!
//! `id` is the platform id (0 when not yet imported) and `foreign_id` the
//! vendor's id. The platform treats `id > 0` as an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Records that carry both a platform id and a vendor id.
pub trait Mapped {
    fn id(&self) -> i64;
    fn foreign_id(&self) -> &str;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub foreign_id: String,
    #[serde(default)]
    pub send_invitation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Client {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub foreign_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub billable: bool,
    #[serde(default)]
    pub client_id: i64,
    pub foreign_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_client_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub project_id: i64,
    pub foreign_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_project_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeEntry {
    pub id: i64,
    #[serde(default)]
    pub project_id: i64,
    #[serde(default)]
    pub task_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub billable: bool,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_in_seconds: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_project_id: Option<String>,
}

/// A fetched batch written to the imports store, with the fetch error if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staged<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Staged<T> {
    pub fn from_result<E: std::fmt::Display>(result: &Result<Vec<T>, E>) -> Self
    where
        T: Clone,
    {
        match result {
            Ok(items) => Self {
                items: items.clone(),
                error: None,
            },
            Err(err) => Self {
                items: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

macro_rules! impl_mapped {
    ($($ty:ty),*) => {
        $(impl Mapped for $ty {
            fn id(&self) -> i64 {
                self.id
            }

            fn foreign_id(&self) -> &str {
                &self.foreign_id
            }
        })*
    };
}

impl_mapped!(User, Client, Project, Task);
