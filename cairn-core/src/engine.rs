//! Engine - Trait abstracting the resource-graph execution engine
//!
//! An Engine turns a program and the current snapshot into a [`Plan`] and
//! applies that plan one [`Step`] at a time. The backend owns sequencing,
//! cancellation checks and persistence; the engine only talks to the
//! infrastructure.

use async_trait::async_trait;

use crate::operation::{UpdateKind, UpdateOperation};
use crate::plan::{Plan, Step};
use crate::resource::{ResourceId, ResourceState};
use crate::snapshot::Snapshot;

/// Error type for Engine operations
#[derive(Debug)]
pub struct EngineError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What applying a step left behind
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The resource now has this state
    Applied(ResourceState),
    /// The resource no longer exists
    Removed,
}

/// Resource-graph execution engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Compute the steps for `kind` against the current snapshot
    ///
    /// Planning must have no side effects; it may be abandoned at any point.
    async fn plan(
        &self,
        kind: UpdateKind,
        op: &UpdateOperation,
        snapshot: Option<&Snapshot>,
    ) -> EngineResult<Plan>;

    /// Perform a single step against the infrastructure
    async fn apply(&self, step: &Step, op: &UpdateOperation) -> EngineResult<StepOutcome>;

    /// Run read-only program logic against the current snapshot
    async fn query(&self, _op: &UpdateOperation, _snapshot: Option<&Snapshot>) -> EngineResult<()> {
        Ok(())
    }
}
