//! Update-operation state machine
//!
//! Every update-style operation runs through the same phases:
//!
//! ```text
//! Idle -> Locking -> Running -> Committing -> Done
//!                         \---> Cancelling -> Bailed
//!                          \--> Failing    -> Failed
//! ```
//!
//! The stack lock is held from Locking until the run reaches a terminal phase.
//! The lease is renewed before every engine call that may take long and before
//! every write; a run whose lease was taken over fails with a conflict and
//! writes nothing more. Each state-changing step is written to the snapshot
//! before the next one starts, so a run that stops early leaves a consistent,
//! resumable snapshot.

use cairn_core::{
    Engine, Plan, ResourceChanges, Snapshot, StackReference, StepOutcome, UpdateKind,
    UpdateOperation,
};
use chrono::{DateTime, Utc};

use crate::backend::{BackendError, BackendResult};
use crate::history::{UpdateInfo, UpdateStatus};
use crate::lock::LockInfo;
use crate::result::{UpdateOutcome, UpdateResult};
use crate::store::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locking,
    Running,
    Committing,
    Cancelling,
    Failing,
    Done,
    Bailed,
    Failed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            // Query skips Locking; a token cancelled up front skips everything
            (Idle, Locking | Running | Cancelling)
                | (Locking, Running | Cancelling | Failing)
                | (Running, Committing | Cancelling | Failing)
                | (Committing, Done | Failing)
                | (Cancelling, Bailed)
                | (Failing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Bailed | Phase::Failed)
    }
}

/// How the Running phase ended when it did not fail
enum Flow {
    Completed,
    Cancelled,
}

/// One execution of an update-style operation against one stack
pub(crate) struct UpdateRun<'a> {
    kind: UpdateKind,
    reference: &'a StackReference,
    store: &'a dyn StateStore,
    engine: &'a dyn Engine,
    op: UpdateOperation,
    phase: Phase,
    changes: ResourceChanges,
    started: DateTime<Utc>,
    lock: Option<LockInfo>,
    serial: Option<u64>,
}

impl<'a> UpdateRun<'a> {
    pub(crate) fn new(
        kind: UpdateKind,
        reference: &'a StackReference,
        store: &'a dyn StateStore,
        engine: &'a dyn Engine,
        op: UpdateOperation,
    ) -> Self {
        Self {
            kind,
            reference,
            store,
            engine,
            op,
            phase: Phase::Idle,
            changes: ResourceChanges::default(),
            started: Utc::now(),
            lock: None,
            serial: None,
        }
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.phase,
            next
        );
        log::debug!(
            "{} of {}: {:?} -> {:?}",
            self.kind,
            self.reference,
            self.phase,
            next
        );
        self.phase = next;
    }

    /// Drive the run to a terminal phase, releasing the lock on every path
    pub(crate) async fn execute(mut self) -> UpdateOutcome {
        let flow = if self.op.is_cancelled() {
            Ok(Flow::Cancelled)
        } else {
            match self.lock().await {
                Ok(true) => self.running().await,
                Ok(false) => Ok(Flow::Cancelled),
                Err(e) => Err(e),
            }
        };

        let result = match flow {
            Ok(Flow::Completed) => self.commit().await,
            Ok(Flow::Cancelled) => self.bail().await,
            Err(e) => self.fail(e).await,
        };
        debug_assert!(self.phase.is_terminal());

        self.release().await;
        UpdateOutcome::new(self.changes, result)
    }

    /// Returns false when cancellation arrived while the lock was taken
    async fn lock(&mut self) -> BackendResult<bool> {
        if self.kind.requires_lock() {
            self.transition(Phase::Locking);
            let lock = self
                .store
                .acquire_lock(self.reference, self.kind.as_str())
                .await?;
            self.lock = Some(lock);
            if self.op.is_cancelled() {
                return Ok(false);
            }
        }
        self.transition(Phase::Running);
        Ok(true)
    }

    /// Renew the lease, giving it up if another holder replaced it
    async fn keep_lease(&mut self) -> BackendResult<()> {
        let Some(lock) = &self.lock else {
            return Ok(());
        };
        match self.store.renew_lock(self.reference, lock).await {
            Ok(renewed) => {
                self.lock = Some(renewed);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                log::warn!(
                    "{} of {} lost lock {}: {}",
                    self.kind,
                    self.reference,
                    lock.id,
                    e
                );
                self.lock = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn running(&mut self) -> BackendResult<Flow> {
        match self.kind {
            UpdateKind::Watch => self.watch().await,
            UpdateKind::Query => self.query().await,
            _ => self.apply_plan().await,
        }
    }

    /// Plan against `snapshot`, abandoning the plan if cancelled first
    async fn plan(&self, snapshot: Option<&Snapshot>) -> BackendResult<Option<Plan>> {
        let cancellation = self.op.cancellation();
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Ok(None),
            plan = self.engine.plan(self.kind, &self.op, snapshot) => Ok(Some(plan?)),
        }
    }

    async fn apply_plan(&mut self) -> BackendResult<Flow> {
        let base = self.store.read_snapshot(self.reference).await?;
        self.serial = base.as_ref().map(|s| s.serial);

        let Some(plan) = self.plan(base.as_ref()).await? else {
            return Ok(Flow::Cancelled);
        };

        let summary = plan.summary();
        let checks_changes = matches!(self.kind, UpdateKind::Preview | UpdateKind::Update);
        if checks_changes && self.op.options.expect_no_changes && summary.has_changes() {
            return Err(BackendError::validation(format!(
                "no changes were expected but the plan has {}",
                summary
            )));
        }

        if self.kind == UpdateKind::Preview {
            for step in plan.steps().iter().filter(|s| s.op.is_mutating()) {
                self.op.diagnostics().info(&format!("would {}", step));
            }
            self.changes = summary;
            return Ok(Flow::Completed);
        }

        let mut working = base.unwrap_or_default();
        for step in plan.steps() {
            if self.op.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if !step.op.is_mutating() {
                self.changes.record(step.op);
                continue;
            }

            self.keep_lease().await?;
            match self.engine.apply(step, &self.op).await? {
                StepOutcome::Applied(state) => working.upsert_resource(state),
                StepOutcome::Removed => {
                    working.remove_resource(&step.id);
                }
            }
            working.advance();
            self.keep_lease().await?;
            self.store
                .write_snapshot(self.reference, &working)
                .await?;

            // Counted only once durable
            self.changes.record(step.op);
            self.serial = Some(working.serial);
        }

        Ok(Flow::Completed)
    }

    async fn watch(&mut self) -> BackendResult<Flow> {
        let mut rounds = 0u32;
        loop {
            if self.op.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            self.keep_lease().await?;

            let snapshot = self.store.read_snapshot(self.reference).await?;
            let Some(plan) = self.plan(snapshot.as_ref()).await? else {
                return Ok(Flow::Cancelled);
            };

            let sink = self.op.diagnostics();
            if plan.mutation_count() == 0 {
                sink.info("no pending changes");
            }
            for step in plan.steps().iter().filter(|s| s.op.is_mutating()) {
                sink.info(&format!("pending {}", step));
            }

            rounds += 1;
            if self.op.options.watch_rounds.is_some_and(|max| rounds >= max) {
                return Ok(Flow::Completed);
            }

            let cancellation = self.op.cancellation();
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(Flow::Cancelled),
                _ = tokio::time::sleep(self.op.options.watch_interval) => {}
            }
        }
    }

    async fn query(&mut self) -> BackendResult<Flow> {
        let snapshot = self.store.read_snapshot(self.reference).await?;
        let cancellation = self.op.cancellation();
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Ok(Flow::Cancelled),
            result = self.engine.query(&self.op, snapshot.as_ref()) => {
                result?;
                Ok(Flow::Completed)
            }
        }
    }

    async fn commit(&mut self) -> UpdateResult {
        self.transition(Phase::Committing);
        if self.kind.mutates_state() {
            if let Err(e) = self.record(UpdateStatus::Succeeded, None).await {
                return self.fail(e).await;
            }
            log::info!(
                "{} of {} committed: {}",
                self.kind,
                self.reference,
                self.changes
            );
        }
        self.transition(Phase::Done);
        UpdateResult::Succeeded
    }

    async fn bail(&mut self) -> UpdateResult {
        self.transition(Phase::Cancelling);
        if self.kind.mutates_state()
            && self.lock.is_some()
            && let Err(e) = self.record(UpdateStatus::Cancelled, None).await
        {
            log::warn!(
                "failed to record cancelled {} of {}: {}",
                self.kind,
                self.reference,
                e
            );
        }
        self.transition(Phase::Bailed);
        UpdateResult::Bailed
    }

    async fn fail(&mut self, error: BackendError) -> UpdateResult {
        self.transition(Phase::Failing);
        let error = BackendError::operation(self.kind, self.reference, error);
        if self.kind.mutates_state()
            && self.lock.is_some()
            && let Err(e) = self
                .record(UpdateStatus::Failed, Some(error.to_string()))
                .await
        {
            log::warn!(
                "failed to record failed {} of {}: {}",
                self.kind,
                self.reference,
                e
            );
        }
        self.transition(Phase::Failed);
        UpdateResult::Failed(error)
    }

    async fn record(&mut self, status: UpdateStatus, error: Option<String>) -> BackendResult<()> {
        self.keep_lease().await?;
        let entry = UpdateInfo {
            kind: self.kind,
            start_time: self.started,
            end_time: Utc::now(),
            message: self.op.metadata.message.clone(),
            environment: self.op.metadata.environment.clone(),
            config: self.op.config.config.clone(),
            status,
            error,
            resource_changes: self.changes,
            serial: self.serial,
        };
        self.store.append_history(self.reference, &entry).await
    }

    async fn release(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(e) = self.store.release_lock(self.reference, &lock).await
        {
            log::warn!(
                "failed to release lock {} on {}: {}",
                lock.id,
                self.reference,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Phase::Idle,
            Phase::Locking,
            Phase::Running,
            Phase::Committing,
            Phase::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_cancel_and_fail_transitions() {
        assert!(Phase::Idle.can_transition_to(Phase::Cancelling));
        assert!(Phase::Locking.can_transition_to(Phase::Cancelling));
        assert!(Phase::Locking.can_transition_to(Phase::Failing));
        assert!(Phase::Running.can_transition_to(Phase::Cancelling));
        assert!(Phase::Committing.can_transition_to(Phase::Failing));
        assert!(Phase::Cancelling.can_transition_to(Phase::Bailed));
        assert!(Phase::Failing.can_transition_to(Phase::Failed));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Phase::Idle.can_transition_to(Phase::Done));
        assert!(!Phase::Running.can_transition_to(Phase::Done));
        assert!(!Phase::Cancelling.can_transition_to(Phase::Done));
        assert!(!Phase::Done.can_transition_to(Phase::Running));
        assert!(!Phase::Failed.can_transition_to(Phase::Failing));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Bailed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Committing.is_terminal());
    }
}
