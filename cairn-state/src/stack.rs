//! Stack - a handle on one stack held by a backend

use std::sync::{Arc, Weak};

use cairn_core::config::{ConfigMap, StackConfiguration};
use cairn_core::crypter::Crypter;
use cairn_core::logs::{LogEntry, LogQuery};
use cairn_core::{Snapshot, StackName, StackReference, UntypedDeployment, UpdateOperation};
use tokio::sync::OnceCell;

use crate::backend::{Backend, BackendError, BackendResult, StackTags};
use crate::history::UpdateInfo;
use crate::result::{UpdateOutcome, UpdateResult};

/// A stack as seen through the backend that returned it
///
/// The handle does not keep its backend alive. Once the backend is dropped,
/// every call fails with [`BackendError::BackendGone`].
#[derive(Debug, Clone)]
pub struct Stack {
    reference: StackReference,
    backend: Weak<dyn Backend>,
    config: OnceCell<ConfigMap>,
}

impl Stack {
    pub fn new(reference: StackReference, backend: Weak<dyn Backend>) -> Self {
        Self {
            reference,
            backend,
            config: OnceCell::new(),
        }
    }

    pub fn reference(&self) -> &StackReference {
        &self.reference
    }

    /// The owning backend, if it is still alive
    pub fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.upgrade()
    }

    fn owner(&self) -> BackendResult<Arc<dyn Backend>> {
        self.backend()
            .ok_or_else(|| BackendError::BackendGone(self.reference.to_string()))
    }

    /// Configuration of the most recent update, fetched once and cached
    pub async fn config(&self) -> BackendResult<&ConfigMap> {
        self.config
            .get_or_try_init(|| async {
                self.owner()?
                    .get_latest_configuration(&self.reference)
                    .await
            })
            .await
    }

    /// The current durable snapshot
    pub async fn snapshot(&self) -> BackendResult<Option<Snapshot>> {
        self.owner()?.get_snapshot(&self.reference).await
    }

    pub async fn preview(&self, op: UpdateOperation) -> UpdateOutcome {
        match self.owner() {
            Ok(backend) => backend.preview(&self.reference, op).await,
            Err(e) => UpdateOutcome::failed(e),
        }
    }

    pub async fn update(&self, op: UpdateOperation) -> UpdateOutcome {
        match self.owner() {
            Ok(backend) => backend.update(&self.reference, op).await,
            Err(e) => UpdateOutcome::failed(e),
        }
    }

    pub async fn refresh(&self, op: UpdateOperation) -> UpdateOutcome {
        match self.owner() {
            Ok(backend) => backend.refresh(&self.reference, op).await,
            Err(e) => UpdateOutcome::failed(e),
        }
    }

    pub async fn destroy(&self, op: UpdateOperation) -> UpdateOutcome {
        match self.owner() {
            Ok(backend) => backend.destroy(&self.reference, op).await,
            Err(e) => UpdateOutcome::failed(e),
        }
    }

    pub async fn watch(&self, op: UpdateOperation) -> UpdateResult {
        match self.owner() {
            Ok(backend) => backend.watch(&self.reference, op).await,
            Err(e) => UpdateResult::Failed(e),
        }
    }

    pub async fn query(&self, op: UpdateOperation) -> UpdateResult {
        match self.owner() {
            Ok(backend) => backend.query(&self.reference, op).await,
            Err(e) => UpdateResult::Failed(e),
        }
    }

    /// Remove the stack; see [`Backend::remove_stack`]
    pub async fn remove(&self, force: bool) -> BackendResult<bool> {
        self.owner()?.remove_stack(&self.reference, force).await
    }

    /// Rename the stack, returning a handle for the new name
    pub async fn rename(&self, new_name: &StackName) -> BackendResult<Stack> {
        let reference = self
            .owner()?
            .rename_stack(&self.reference, new_name)
            .await?;
        Ok(Stack::new(reference, self.backend.clone()))
    }

    pub async fn get_logs(
        &self,
        config: &StackConfiguration,
        query: &LogQuery,
    ) -> BackendResult<Vec<LogEntry>> {
        self.owner()?.get_logs(&self.reference, config, query).await
    }

    pub async fn history(&self) -> BackendResult<Vec<UpdateInfo>> {
        self.owner()?.get_history(&self.reference).await
    }

    pub async fn export_deployment(&self) -> BackendResult<UntypedDeployment> {
        self.owner()?.export_deployment(&self.reference).await
    }

    pub async fn import_deployment(&self, deployment: &UntypedDeployment) -> BackendResult<()> {
        self.owner()?
            .import_deployment(&self.reference, deployment)
            .await
    }

    pub async fn tags(&self) -> BackendResult<StackTags> {
        self.owner()?.get_stack_tags(&self.reference).await
    }

    pub fn crypter(&self) -> BackendResult<Arc<dyn Crypter>> {
        self.owner()?.get_stack_crypter(&self.reference)
    }
}
