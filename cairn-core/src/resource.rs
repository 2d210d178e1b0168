//! Resource - Identity and recorded state of a managed resource

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a resource within a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type (e.g., "s3.bucket", "vpc.subnet")
    pub resource_type: String,
    /// Resource name (identifier given by the program)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// State of a single managed resource as recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "s3.bucket", "vpc.vpc")
    pub resource_type: String,
    /// Resource name
    pub name: String,
    /// Provider name (e.g., "aws")
    pub provider: String,
    /// All attributes of the resource as JSON values
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ResourceState {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.resource_type.clone(), self.name.clone())
    }

    /// Whether this state belongs to the resource identified by `id`
    pub fn is(&self, id: &ResourceId) -> bool {
        self.resource_type == id.resource_type && self.name == id.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_display() {
        let id = ResourceId::new("s3.bucket", "logs");
        assert_eq!(id.to_string(), "s3.bucket.logs");
    }

    #[test]
    fn resource_state_identity() {
        let state = ResourceState::new("s3.bucket", "logs", "aws")
            .with_attribute("region", serde_json::json!("ap-northeast-1"));
        assert_eq!(state.id(), ResourceId::new("s3.bucket", "logs"));
        assert!(state.is(&ResourceId::new("s3.bucket", "logs")));
        assert!(!state.is(&ResourceId::new("s3.bucket", "other")));
    }
}
