//! Backend trait, error types and backend configuration

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::config::{ConfigMap, StackConfiguration};
use cairn_core::crypter::{Crypter, CrypterError};
use cairn_core::deployment::DeploymentError;
use cairn_core::logs::{LogEntry, LogError, LogQuery};
use cairn_core::{
    EngineError, ParseError, Snapshot, StackName, StackReference, UntypedDeployment, UpdateKind,
    UpdateOperation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::UpdateInfo;
use crate::lock::LockInfo;
use crate::result::{UpdateOutcome, UpdateResult};
use crate::stack::Stack;

/// Errors that can occur when interacting with a backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The stack does not exist
    #[error("Stack not found: {0}")]
    NotFound(String),

    /// A stack with this reference already exists
    #[error("Stack already exists: {0}")]
    AlreadyExists(String),

    /// The stack is locked by another operation
    #[error("Stack {stack} is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        stack: String,
        lock_id: String,
        who: String,
        operation: String,
    },

    /// A lease expired and was taken over or released before it was renewed
    #[error("Lost lock {lock_id} on stack {stack}")]
    LeaseLost { stack: String, lock_id: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Input rejected before anything was mutated
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Reading or writing durable state failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Durable state exists but cannot be understood
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Stack {0} still has resources; use force to remove it anyway")]
    StackHasResources(String),

    #[error("Stack {0} has no previous deployment")]
    NoPreviousDeployment(String),

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Crypter(#[from] CrypterError),

    #[error(transparent)]
    Logs(#[from] LogError),

    /// The backend that handed out a stack has been dropped
    #[error("Backend for stack {0} is no longer available")]
    BackendGone(String),

    /// A failure inside an update-style operation
    #[error("{kind} of {reference} failed: {source}")]
    Operation {
        kind: UpdateKind,
        reference: StackReference,
        source: Box<BackendError>,
    },
}

impl BackendError {
    /// Create a Locked error from the lock currently held on a stack
    pub fn locked(reference: &StackReference, lock: &LockInfo) -> Self {
        Self::Locked {
            stack: reference.to_string(),
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    pub fn lease_lost(lock: &LockInfo) -> Self {
        Self::LeaseLost {
            stack: lock.stack.to_string(),
            lock_id: lock.id.clone(),
        }
    }

    pub fn not_found(reference: &StackReference) -> Self {
        Self::NotFound(reference.to_string())
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a failure so it names the operation and stack it happened in
    pub fn operation(kind: UpdateKind, reference: &StackReference, source: BackendError) -> Self {
        Self::Operation {
            kind,
            reference: reference.clone(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through `Operation` wrappers
    pub fn root(&self) -> &BackendError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the failure was contention on the stack lock
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Locked { .. } | Self::LeaseLost { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }
}

impl From<DeploymentError> for BackendError {
    fn from(e: DeploymentError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Tags attached to a stack, ordered by name
pub type StackTags = BTreeMap<String, String>;

const MAX_TAG_NAME_LENGTH: usize = 40;
const MAX_TAG_VALUE_LENGTH: usize = 256;

/// Check tag names and values before they are stored
pub fn validate_tags(tags: &StackTags) -> BackendResult<()> {
    for (name, value) in tags {
        if name.is_empty() || name.len() > MAX_TAG_NAME_LENGTH {
            return Err(BackendError::validation(format!(
                "tag name '{}' must be 1 to {} characters",
                name, MAX_TAG_NAME_LENGTH
            )));
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
        if !valid {
            return Err(BackendError::validation(format!(
                "tag name '{}' may only contain alphanumerics, hyphens, underscores, periods \
                 or colons",
                name
            )));
        }
        if value.chars().count() > MAX_TAG_VALUE_LENGTH {
            return Err(BackendError::validation(format!(
                "value of tag '{}' is longer than {} characters",
                name, MAX_TAG_VALUE_LENGTH
            )));
        }
    }
    Ok(())
}

/// Options for creating a stack
#[derive(Debug, Clone, Default)]
pub struct CreateStackOptions {
    pub tags: StackTags,
}

/// Restricts which stacks `list_stacks` returns
#[derive(Debug, Clone, Default)]
pub struct ListStacksFilter {
    pub project: Option<String>,
    pub tag_name: Option<String>,
    /// Only meaningful together with `tag_name`
    pub tag_value: Option<String>,
}

impl ListStacksFilter {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, reference: &StackReference, tags: &StackTags) -> bool {
        if self.project.as_deref().is_some_and(|p| p != reference.project()) {
            return false;
        }
        match (&self.tag_name, &self.tag_value) {
            (Some(name), Some(value)) => tags.get(name) == Some(value),
            (Some(name), None) => tags.contains_key(name),
            _ => true,
        }
    }
}

/// One row of `list_stacks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSummary {
    pub reference: StackReference,
    /// End time of the most recent recorded update
    pub last_update: Option<DateTime<Utc>>,
    /// Number of resources in the current snapshot, if one exists
    pub resource_count: Option<usize>,
}

/// The stack management protocol every backend implements
///
/// Update-style operations report through [`UpdateOutcome`] or [`UpdateResult`]
/// rather than `Err`; everything else returns errors directly.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend type name, e.g. `local`
    fn name(&self) -> &str;

    /// Location of the backend's durable state
    fn url(&self) -> String;

    fn supports_organizations(&self) -> bool;

    /// Parse a possibly abbreviated stack reference using this backend's defaults
    fn parse_stack_reference(&self, s: &str) -> Result<StackReference, ParseError>;

    /// Whether any stack exists in `project`
    async fn does_project_exist(&self, project: &str) -> BackendResult<bool>;

    /// Look up an existing stack
    async fn get_stack(&self, reference: &StackReference) -> BackendResult<Stack>;

    /// Create a new, empty stack
    ///
    /// Of several concurrent creators of the same reference exactly one succeeds;
    /// the others fail with [`BackendError::AlreadyExists`].
    async fn create_stack(
        &self,
        reference: &StackReference,
        options: CreateStackOptions,
    ) -> BackendResult<Stack>;

    /// Remove a stack, returning whether it still had resources
    ///
    /// Without `force` a stack with resources is left untouched and
    /// [`BackendError::StackHasResources`] is returned.
    async fn remove_stack(&self, reference: &StackReference, force: bool) -> BackendResult<bool>;

    /// Stacks matching `filter`, sorted by reference
    async fn list_stacks(&self, filter: &ListStacksFilter) -> BackendResult<Vec<StackSummary>>;

    /// Rename a stack within its project
    async fn rename_stack(
        &self,
        reference: &StackReference,
        new_name: &StackName,
    ) -> BackendResult<StackReference>;

    /// The crypter for a stack's secrets
    fn get_stack_crypter(&self, reference: &StackReference) -> BackendResult<Arc<dyn Crypter>>;

    /// The stack's current durable snapshot, if any
    async fn get_snapshot(&self, reference: &StackReference) -> BackendResult<Option<Snapshot>>;

    async fn preview(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome;

    async fn update(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome;

    async fn refresh(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome;

    async fn destroy(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome;

    async fn watch(&self, reference: &StackReference, op: UpdateOperation) -> UpdateResult;

    async fn query(&self, reference: &StackReference, op: UpdateOperation) -> UpdateResult;

    /// Recorded updates, oldest first
    async fn get_history(&self, reference: &StackReference) -> BackendResult<Vec<UpdateInfo>>;

    /// Log entries for the stack's resources, sorted by timestamp
    async fn get_logs(
        &self,
        reference: &StackReference,
        config: &StackConfiguration,
        query: &LogQuery,
    ) -> BackendResult<Vec<LogEntry>>;

    /// Configuration used by the most recent recorded update
    async fn get_latest_configuration(
        &self,
        reference: &StackReference,
    ) -> BackendResult<ConfigMap>;

    async fn get_stack_tags(&self, reference: &StackReference) -> BackendResult<StackTags>;

    /// Replace the stack's tags
    async fn update_stack_tags(
        &self,
        reference: &StackReference,
        tags: StackTags,
    ) -> BackendResult<()>;

    async fn export_deployment(
        &self,
        reference: &StackReference,
    ) -> BackendResult<UntypedDeployment>;

    /// Validate `deployment` and make it the stack's snapshot
    async fn import_deployment(
        &self,
        reference: &StackReference,
        deployment: &UntypedDeployment,
    ) -> BackendResult<()>;

    /// Release a stale lock regardless of who holds it
    async fn force_unlock(&self, reference: &StackReference, lock_id: &str) -> BackendResult<()>;

    fn logout(&self) -> BackendResult<()>;

    fn current_user(&self) -> BackendResult<String>;
}

/// Configuration for a backend
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Backend type (e.g., "local", "memory")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(|v| v.as_bool())
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Get an unsigned integer attribute value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(|v| v.as_u64())
    }
}
