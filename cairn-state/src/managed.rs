//! Managed backend - the Backend protocol over any StateStore
//!
//! `ManagedBackend` owns the protocol rules (lock discipline, validation
//! before mutation, history) and delegates durable storage to a
//! [`StateStore`] and resource work to an [`Engine`]. The local and memory
//! backends are both this type with a different store.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cairn_core::config::{ConfigMap, StackConfiguration};
use cairn_core::crypter::{Crypter, CrypterProvider, NopCrypter, SharedCrypterProvider};
use cairn_core::logs::{LogEntry, LogProvider, LogQuery};
use cairn_core::reference::ReferenceDefaults;
use cairn_core::{
    Engine, ParseError, Snapshot, StackName, StackReference, UntypedDeployment, UpdateKind,
    UpdateOperation,
};

use crate::backend::{
    Backend, BackendError, BackendResult, CreateStackOptions, ListStacksFilter, StackSummary,
    StackTags, validate_tags,
};
use crate::history::UpdateInfo;
use crate::lock::{LockInfo, current_user};
use crate::result::{UpdateOutcome, UpdateResult};
use crate::stack::Stack;
use crate::store::{StackRecord, StateStore};
use crate::update::UpdateRun;

pub struct ManagedBackend {
    this: Weak<ManagedBackend>,
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    crypters: Arc<dyn CrypterProvider>,
    logs: Option<Arc<dyn LogProvider>>,
    defaults: ReferenceDefaults,
}

/// Builder for [`ManagedBackend`]
pub struct ManagedBackendBuilder {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    crypters: Option<Arc<dyn CrypterProvider>>,
    logs: Option<Arc<dyn LogProvider>>,
    defaults: ReferenceDefaults,
}

impl ManagedBackendBuilder {
    /// Crypters for stack secrets (default: identity, secrets stored as given)
    pub fn crypters(mut self, crypters: Arc<dyn CrypterProvider>) -> Self {
        self.crypters = Some(crypters);
        self
    }

    pub fn log_provider(mut self, logs: Arc<dyn LogProvider>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Organization and project filled into abbreviated references
    pub fn defaults(mut self, defaults: ReferenceDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn build(self) -> Arc<ManagedBackend> {
        let crypters = self
            .crypters
            .unwrap_or_else(|| Arc::new(SharedCrypterProvider::new(Arc::new(NopCrypter))));

        Arc::new_cyclic(|this| ManagedBackend {
            this: this.clone(),
            store: self.store,
            engine: self.engine,
            crypters,
            logs: self.logs,
            defaults: self.defaults,
        })
    }
}

impl ManagedBackend {
    pub fn builder(store: Arc<dyn StateStore>, engine: Arc<dyn Engine>) -> ManagedBackendBuilder {
        ManagedBackendBuilder {
            store,
            engine,
            crypters: None,
            logs: None,
            defaults: ReferenceDefaults::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    fn handle(&self, reference: StackReference) -> Stack {
        let backend: Weak<dyn Backend> = self.this.clone();
        Stack::new(reference, backend)
    }

    async fn require_stack(&self, reference: &StackReference) -> BackendResult<StackRecord> {
        self.store
            .read_stack(reference)
            .await?
            .ok_or_else(|| BackendError::not_found(reference))
    }

    async fn release(&self, reference: &StackReference, lock: &LockInfo) {
        if let Err(e) = self.store.release_lock(reference, lock).await {
            log::warn!("failed to release lock {} on {}: {}", lock.id, reference, e);
        }
    }

    async fn run(
        &self,
        kind: UpdateKind,
        reference: &StackReference,
        op: UpdateOperation,
    ) -> UpdateOutcome {
        if let Err(e) = self.require_stack(reference).await {
            return UpdateOutcome::failed(BackendError::operation(kind, reference, e));
        }
        UpdateRun::new(kind, reference, self.store.as_ref(), self.engine.as_ref(), op)
            .execute()
            .await
    }

    async fn remove_locked(&self, reference: &StackReference, force: bool) -> BackendResult<bool> {
        let snapshot = self.store.read_snapshot(reference).await?;
        let has_resources = snapshot.is_some_and(|s| !s.is_empty());
        if has_resources && !force {
            return Err(BackendError::StackHasResources(reference.to_string()));
        }
        self.store.delete_stack(reference).await?;
        Ok(has_resources)
    }

    async fn import_locked(
        &self,
        reference: &StackReference,
        mut snapshot: Snapshot,
    ) -> BackendResult<()> {
        // Keep serials moving forward for anyone comparing against the old snapshot
        if let Some(existing) = self.store.read_snapshot(reference).await?
            && existing.serial >= snapshot.serial
        {
            snapshot.serial = existing.serial + 1;
        }
        self.store.write_snapshot(reference, &snapshot).await
    }

    async fn summarize(&self, record: StackRecord) -> BackendResult<StackSummary> {
        let history = self.store.read_history(&record.reference).await?;
        let snapshot = self.store.read_snapshot(&record.reference).await?;
        Ok(StackSummary {
            last_update: history.last().map(|h| h.end_time),
            resource_count: snapshot.map(|s| s.resources.len()),
            reference: record.reference,
        })
    }
}

#[async_trait]
impl Backend for ManagedBackend {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn url(&self) -> String {
        self.store.url()
    }

    fn supports_organizations(&self) -> bool {
        true
    }

    fn parse_stack_reference(&self, s: &str) -> Result<StackReference, ParseError> {
        StackReference::parse_with_defaults(s, &self.defaults)
    }

    async fn does_project_exist(&self, project: &str) -> BackendResult<bool> {
        let stacks = self.store.list_stacks().await?;
        Ok(stacks.iter().any(|r| r.reference.project() == project))
    }

    async fn get_stack(&self, reference: &StackReference) -> BackendResult<Stack> {
        self.require_stack(reference).await?;
        Ok(self.handle(reference.clone()))
    }

    async fn create_stack(
        &self,
        reference: &StackReference,
        options: CreateStackOptions,
    ) -> BackendResult<Stack> {
        validate_tags(&options.tags)?;
        let record = StackRecord::new(reference.clone(), options.tags);
        self.store.create_stack(&record).await?;
        log::info!("created stack {}", reference);
        Ok(self.handle(reference.clone()))
    }

    async fn remove_stack(&self, reference: &StackReference, force: bool) -> BackendResult<bool> {
        self.require_stack(reference).await?;
        let lock = self.store.acquire_lock(reference, "remove").await?;
        let result = self.remove_locked(reference, force).await;
        self.release(reference, &lock).await;

        if result.is_ok() {
            log::info!("removed stack {}", reference);
        }
        result
    }

    async fn list_stacks(&self, filter: &ListStacksFilter) -> BackendResult<Vec<StackSummary>> {
        let mut summaries = Vec::new();
        for record in self.store.list_stacks().await? {
            if !filter.matches(&record.reference, &record.tags) {
                continue;
            }
            match self.summarize(record).await {
                Ok(summary) => summaries.push(summary),
                // Removed while we were listing
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    async fn rename_stack(
        &self,
        reference: &StackReference,
        new_name: &StackName,
    ) -> BackendResult<StackReference> {
        self.require_stack(reference).await?;
        let target = reference.renamed(new_name.clone());
        if target == *reference {
            return Ok(target);
        }
        if self.store.read_stack(&target).await?.is_some() {
            return Err(BackendError::AlreadyExists(target.to_string()));
        }

        let lock = self.store.acquire_lock(reference, "rename").await?;
        let result = self.store.rename_stack(reference, &target).await;
        self.release(reference, &lock).await;
        result?;

        log::info!("renamed stack {} to {}", reference, target);
        Ok(target)
    }

    fn get_stack_crypter(&self, reference: &StackReference) -> BackendResult<Arc<dyn Crypter>> {
        Ok(self.crypters.crypter_for(reference)?)
    }

    async fn get_snapshot(&self, reference: &StackReference) -> BackendResult<Option<Snapshot>> {
        self.store.read_snapshot(reference).await
    }

    async fn preview(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome {
        self.run(UpdateKind::Preview, reference, op).await
    }

    async fn update(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome {
        self.run(UpdateKind::Update, reference, op).await
    }

    async fn refresh(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome {
        self.run(UpdateKind::Refresh, reference, op).await
    }

    async fn destroy(&self, reference: &StackReference, op: UpdateOperation) -> UpdateOutcome {
        self.run(UpdateKind::Destroy, reference, op).await
    }

    async fn watch(&self, reference: &StackReference, op: UpdateOperation) -> UpdateResult {
        self.run(UpdateKind::Watch, reference, op).await.result
    }

    async fn query(&self, reference: &StackReference, op: UpdateOperation) -> UpdateResult {
        self.run(UpdateKind::Query, reference, op).await.result
    }

    async fn get_history(&self, reference: &StackReference) -> BackendResult<Vec<UpdateInfo>> {
        self.require_stack(reference).await?;
        self.store.read_history(reference).await
    }

    async fn get_logs(
        &self,
        reference: &StackReference,
        config: &StackConfiguration,
        query: &LogQuery,
    ) -> BackendResult<Vec<LogEntry>> {
        self.require_stack(reference).await?;
        let Some(provider) = &self.logs else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<LogEntry> = provider
            .query(reference, config, query)
            .await?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn get_latest_configuration(
        &self,
        reference: &StackReference,
    ) -> BackendResult<ConfigMap> {
        self.require_stack(reference).await?;
        self.store
            .read_history(reference)
            .await?
            .pop()
            .map(|latest| latest.config)
            .ok_or_else(|| BackendError::NoPreviousDeployment(reference.to_string()))
    }

    async fn get_stack_tags(&self, reference: &StackReference) -> BackendResult<StackTags> {
        Ok(self.require_stack(reference).await?.tags)
    }

    async fn update_stack_tags(
        &self,
        reference: &StackReference,
        tags: StackTags,
    ) -> BackendResult<()> {
        validate_tags(&tags)?;
        let mut record = self.require_stack(reference).await?;
        record.tags = tags;
        self.store.write_stack(&record).await
    }

    async fn export_deployment(
        &self,
        reference: &StackReference,
    ) -> BackendResult<UntypedDeployment> {
        self.require_stack(reference).await?;
        let snapshot = self
            .store
            .read_snapshot(reference)
            .await?
            .ok_or_else(|| BackendError::NoPreviousDeployment(reference.to_string()))?;
        UntypedDeployment::from_snapshot(&snapshot)
            .map_err(|e| BackendError::persistence(e.to_string()))
    }

    async fn import_deployment(
        &self,
        reference: &StackReference,
        deployment: &UntypedDeployment,
    ) -> BackendResult<()> {
        self.require_stack(reference).await?;
        // Validate fully before touching the stack
        let snapshot = deployment.to_snapshot()?;

        let lock = self.store.acquire_lock(reference, "import").await?;
        let result = self.import_locked(reference, snapshot).await;
        self.release(reference, &lock).await;

        if result.is_ok() {
            log::info!("imported deployment into {}", reference);
        }
        result
    }

    async fn force_unlock(&self, reference: &StackReference, lock_id: &str) -> BackendResult<()> {
        self.store.force_unlock(reference, lock_id).await
    }

    fn logout(&self) -> BackendResult<()> {
        Ok(())
    }

    fn current_user(&self) -> BackendResult<String> {
        Ok(current_user())
    }
}
