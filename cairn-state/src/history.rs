//! Update history records

use std::collections::BTreeMap;
use std::fmt;

use cairn_core::config::ConfigMap;
use cairn_core::{ResourceChanges, UpdateKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStatus::Succeeded => "succeeded",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One completed update, refresh or destroy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub kind: UpdateKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub config: ConfigMap,
    pub status: UpdateStatus,
    /// Error message when the update failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resource_changes: ResourceChanges,
    /// Snapshot serial once the update finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
}
