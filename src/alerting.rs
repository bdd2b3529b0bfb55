//! Operator alerts for failed runs and exports.

use std::collections::BTreeMap;

use metrics::counter;

use crate::integrations::Vendor;
use crate::pipes::PipeId;

/// A failure that needs operator attention.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub message: String,
    pub workspace_id: i64,
    pub vendor: Vendor,
    pub pipe: PipeId,
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(workspace_id: i64, vendor: Vendor, pipe: PipeId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            workspace_id,
            vendor,
            pipe,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

pub trait Alerter: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Emits alerts as structured error events and counts them.
#[derive(Debug, Clone, Default)]
pub struct TracingAlerter;

impl Alerter for TracingAlerter {
    fn notify(&self, alert: Alert) {
        counter!(
            "pipes_alerts_total",
            "vendor" => alert.vendor.as_str(),
            "pipe" => alert.pipe.as_str()
        )
        .increment(1);
        tracing::error!(
            workspace_id = alert.workspace_id,
            vendor = %alert.vendor,
            pipe = %alert.pipe,
            metadata = ?alert.metadata,
            "{}",
            alert.message
        );
    }
}
