//! Test engine with injectable delays, failures and cancellation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cairn_core::manifest::{ManifestEngine, ResourceManifest};
use cairn_core::resource::ResourceState;
use cairn_core::{
    Engine, EngineError, EngineResult, Plan, Snapshot, StackReference, Step, StepOutcome,
    UpdateKind, UpdateOperation,
};

/// `n` buckets named `bucket-0` .. `bucket-{n-1}`
pub(crate) fn buckets(n: usize) -> ResourceManifest {
    ResourceManifest {
        resources: (0..n)
            .map(|i| ResourceState::new("s3.bucket", format!("bucket-{}", i), "aws"))
            .collect(),
        replace_on: Vec::new(),
    }
}

pub(crate) fn reference(name: &str) -> StackReference {
    format!("acme/web/{}", name).parse().unwrap()
}

/// Manifest engine that can be slowed down or made to misbehave
pub(crate) struct ScriptedEngine {
    inner: ManifestEngine,
    plan_delay: Duration,
    apply_delay: Duration,
    fail_on: Option<String>,
    cancel_after: Option<usize>,
    applied: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn new(manifest: ResourceManifest) -> Self {
        Self {
            inner: ManifestEngine::new(manifest),
            plan_delay: Duration::ZERO,
            apply_delay: Duration::ZERO,
            fail_on: None,
            cancel_after: None,
            applied: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_plan_delay(mut self, delay: Duration) -> Self {
        self.plan_delay = delay;
        self
    }

    pub(crate) fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Fail when applying the resource with this name
    pub(crate) fn fail_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }

    /// Cancel the operation's token once this many steps were applied
    pub(crate) fn cancel_after(mut self, steps: usize) -> Self {
        self.cancel_after = Some(steps);
        self
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn plan(
        &self,
        kind: UpdateKind,
        op: &UpdateOperation,
        snapshot: Option<&Snapshot>,
    ) -> EngineResult<Plan> {
        if !self.plan_delay.is_zero() {
            tokio::time::sleep(self.plan_delay).await;
        }
        self.inner.plan(kind, op, snapshot).await
    }

    async fn apply(&self, step: &Step, op: &UpdateOperation) -> EngineResult<StepOutcome> {
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        if self.fail_on.as_deref() == Some(step.id.name.as_str()) {
            return Err(EngineError::new("injected failure").for_resource(step.id.clone()));
        }

        let outcome = self.inner.apply(step, op).await?;
        let applied = self.applied.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cancel_after == Some(applied) {
            op.cancellation().cancel();
        }
        Ok(outcome)
    }

    async fn query(&self, op: &UpdateOperation, snapshot: Option<&Snapshot>) -> EngineResult<()> {
        self.inner.query(op, snapshot).await
    }
}
