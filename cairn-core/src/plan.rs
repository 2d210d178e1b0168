//! Plan - Ordered resource steps and the change summary they produce
//!
//! A Plan is produced by an [`Engine`](crate::engine::Engine) and applied one
//! step at a time by the backend. No side effects occur while planning.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceId, ResourceState};

/// Kind of change a step makes to a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOp {
    Same,
    Create,
    Update,
    Replace,
    Delete,
}

impl StepOp {
    /// Whether applying this step changes the recorded state
    pub fn is_mutating(&self) -> bool {
        !matches!(self, StepOp::Same)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepOp::Same => "same",
            StepOp::Create => "create",
            StepOp::Update => "update",
            StepOp::Replace => "replace",
            StepOp::Delete => "delete",
        }
    }
}

impl fmt::Display for StepOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource-level step of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub op: StepOp,
    pub id: ResourceId,
    /// Desired state after the step (absent for deletes)
    pub new: Option<ResourceState>,
}

impl Step {
    pub fn same(state: ResourceState) -> Self {
        Self {
            op: StepOp::Same,
            id: state.id(),
            new: Some(state),
        }
    }

    pub fn create(state: ResourceState) -> Self {
        Self {
            op: StepOp::Create,
            id: state.id(),
            new: Some(state),
        }
    }

    pub fn update(state: ResourceState) -> Self {
        Self {
            op: StepOp::Update,
            id: state.id(),
            new: Some(state),
        }
    }

    pub fn replace(state: ResourceState) -> Self {
        Self {
            op: StepOp::Replace,
            id: state.id(),
            new: Some(state),
        }
    }

    pub fn delete(id: ResourceId) -> Self {
        Self {
            op: StepOp::Delete,
            id,
            new: None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.id)
    }
}

/// Plan containing steps to be applied in order
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps that change state
    pub fn mutation_count(&self) -> usize {
        self.steps.iter().filter(|s| s.op.is_mutating()).count()
    }

    /// Changes this plan would make if applied in full
    pub fn summary(&self) -> ResourceChanges {
        let mut changes = ResourceChanges::default();
        for step in &self.steps {
            changes.record(step.op);
        }
        changes
    }
}

impl FromIterator<Step> for Plan {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Count of resource changes by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChanges {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub same: usize,
}

impl ResourceChanges {
    pub fn record(&mut self, op: StepOp) {
        match op {
            StepOp::Same => self.same += 1,
            StepOp::Create => self.create += 1,
            StepOp::Update => self.update += 1,
            StepOp::Replace => self.replace += 1,
            StepOp::Delete => self.delete += 1,
        }
    }

    /// Number of changes, excluding unchanged resources
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl fmt::Display for ResourceChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.same
        )
    }
}
