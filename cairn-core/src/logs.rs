//! Log queries against a stack's running resources

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StackConfiguration;
use crate::reference::StackReference;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("log query failed: {0}")]
pub struct LogError(pub String);

/// Which log entries to return
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Inclusive lower bound
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub end_time: Option<DateTime<Utc>>,
    /// Only entries whose id contains this string
    pub resource_filter: Option<String>,
}

impl LogQuery {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.start_time.is_some_and(|start| entry.timestamp < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| entry.timestamp >= end) {
            return false;
        }
        match &self.resource_filter {
            Some(filter) => entry.id.contains(filter.as_str()),
            None => true,
        }
    }
}

/// One line of log output from a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Identifier of the resource that produced the entry
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Source of log entries for deployed resources
#[async_trait]
pub trait LogProvider: Send + Sync {
    async fn query(
        &self,
        reference: &StackReference,
        config: &StackConfiguration,
        query: &LogQuery,
    ) -> Result<Vec<LogEntry>, LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, minute: u32) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            message: format!("{} at {}", id, minute),
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(LogQuery::default().matches(&entry("web", 0)));
    }

    #[test]
    fn time_window_is_half_open() {
        let query = LogQuery {
            start_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 0).unwrap()),
            resource_filter: None,
        };
        assert!(!query.matches(&entry("web", 9)));
        assert!(query.matches(&entry("web", 10)));
        assert!(query.matches(&entry("web", 19)));
        assert!(!query.matches(&entry("web", 20)));
    }

    #[test]
    fn resource_filter_matches_substring() {
        let query = LogQuery {
            resource_filter: Some("api".to_string()),
            ..Default::default()
        };
        assert!(query.matches(&entry("lambda.api-handler", 0)));
        assert!(!query.matches(&entry("lambda.worker", 0)));
    }
}
