//! Manifest engine - a reference engine driven by a list of desired resources
//!
//! The engine records resource states without calling any infrastructure API.
//! It is what the CLI uses to exercise backends end to end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::differ::create_plan;
use crate::engine::{Engine, EngineError, EngineResult, StepOutcome};
use crate::operation::{UpdateKind, UpdateOperation};
use crate::plan::{Plan, Step, StepOp};
use crate::resource::ResourceState;
use crate::snapshot::Snapshot;

/// On-disk form of a desired-state manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceManifest {
    #[serde(default)]
    pub resources: Vec<ResourceState>,
    /// Attributes whose change forces a replacement
    #[serde(default)]
    pub replace_on: Vec<String>,
}

pub struct ManifestEngine {
    manifest: ResourceManifest,
}

impl ManifestEngine {
    pub fn new(manifest: ResourceManifest) -> Self {
        Self { manifest }
    }

    pub fn from_json(content: &str) -> EngineResult<Self> {
        let manifest: ResourceManifest = serde_json::from_str(content)
            .map_err(|e| EngineError::new("Failed to parse manifest").with_cause(e))?;
        Ok(Self::new(manifest))
    }

    pub fn manifest(&self) -> &ResourceManifest {
        &self.manifest
    }
}

#[async_trait]
impl Engine for ManifestEngine {
    async fn plan(
        &self,
        kind: UpdateKind,
        op: &UpdateOperation,
        snapshot: Option<&Snapshot>,
    ) -> EngineResult<Plan> {
        let recorded = || snapshot.map(|s| s.resources.iter()).into_iter().flatten();

        let plan: Plan = match kind {
            UpdateKind::Preview | UpdateKind::Update | UpdateKind::Watch => {
                create_plan(&self.manifest.resources, snapshot, &self.manifest.replace_on)
                    .steps()
                    .iter()
                    .filter(|s| op.options.targets(&s.id))
                    .cloned()
                    .collect()
            }
            // Nothing real to read back, so recorded state is already current.
            UpdateKind::Refresh => recorded()
                .filter(|r| op.options.targets(&r.id()))
                .map(|r| Step::same(r.clone()))
                .collect(),
            UpdateKind::Destroy => recorded()
                .rev()
                .filter(|r| op.options.targets(&r.id()))
                .map(|r| Step::delete(r.id()))
                .collect(),
            UpdateKind::Query => Plan::new(),
        };
        Ok(plan)
    }

    async fn apply(&self, step: &Step, op: &UpdateOperation) -> EngineResult<StepOutcome> {
        op.diagnostics().info(&step.to_string());
        match step.op {
            StepOp::Delete => Ok(StepOutcome::Removed),
            _ => step
                .new
                .clone()
                .map(StepOutcome::Applied)
                .ok_or_else(|| {
                    EngineError::new("step has no desired state").for_resource(step.id.clone())
                }),
        }
    }

    async fn query(&self, op: &UpdateOperation, snapshot: Option<&Snapshot>) -> EngineResult<()> {
        let count = snapshot.map_or(0, |s| s.resources.len());
        op.diagnostics().info(&format!("{} resources recorded", count));
        for resource in snapshot.map(|s| s.resources.as_slice()).unwrap_or_default() {
            op.diagnostics().info(&resource.id().to_string());
        }
        Ok(())
    }
}
