//! Foreign-to-internal identifier mappings.
//!
//! The forward map is the stored form. The reversed map is always derived
//! from it on load so the two directions cannot disagree.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// `foreign_id -> internal_id` for one workspace and adapter key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub workspace_id: i64,
    pub key: String,
    pub data: BTreeMap<String, i64>,
}

impl IdMapping {
    pub fn new(workspace_id: i64, key: impl Into<String>) -> Self {
        Self {
            workspace_id,
            key: key.into(),
            data: BTreeMap::new(),
        }
    }

    /// Internal id for `foreign_id`, or 0 when unmapped.
    pub fn get(&self, foreign_id: &str) -> i64 {
        self.data.get(foreign_id).copied().unwrap_or(0)
    }

    pub fn insert(&mut self, foreign_id: impl Into<String>, internal_id: i64) {
        self.data.insert(foreign_id.into(), internal_id);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reversed(&self) -> ReversedIdMapping {
        ReversedIdMapping {
            data: self
                .data
                .iter()
                .map(|(foreign, internal)| (*internal, foreign.clone()))
                .collect(),
        }
    }
}

/// `internal_id -> foreign_ref` view of an [`IdMapping`].
///
/// Foreign refs may carry a type suffix such as `"5-task"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReversedIdMapping {
    data: HashMap<i64, String>,
}

impl ReversedIdMapping {
    /// Internal ids, sorted.
    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.data.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn foreign_ref(&self, internal_id: i64) -> Option<&str> {
        self.data.get(&internal_id).map(String::as_str)
    }

    /// Numeric part of the foreign ref before the first `-`, 0 if absent.
    pub fn foreign_id(&self, internal_id: i64) -> i64 {
        self.foreign_ref(internal_id)
            .and_then(|r| r.split('-').next())
            .and_then(|id| id.parse().ok())
            .unwrap_or(0)
    }

    /// Type suffix after the first `-`, if any.
    pub fn foreign_type(&self, internal_id: i64) -> Option<&str> {
        self.foreign_ref(internal_id)
            .and_then(|r| r.split_once('-'))
            .map(|(_, kind)| kind)
    }
}
