//! Persistence behind a managed backend
//!
//! A [`StateStore`] holds stack records, snapshots, history and locks keyed by
//! stack reference. It knows nothing about the update protocol; sequencing and
//! lock discipline live in [`crate::managed::ManagedBackend`].

use async_trait::async_trait;
use cairn_core::{Snapshot, StackReference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendResult, StackTags};
use crate::history::UpdateInfo;
use crate::lock::LockInfo;

/// Durable metadata about one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    pub reference: StackReference,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub tags: StackTags,
}

impl StackRecord {
    pub fn new(reference: StackReference, tags: StackTags) -> Self {
        Self {
            reference,
            created: Utc::now(),
            tags,
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Short store type name, e.g. `local`
    fn name(&self) -> &str;

    fn url(&self) -> String;

    /// Lock lease length applied by `acquire_lock`
    fn lock_timeout_secs(&self) -> i64;

    /// Atomically create a stack record
    ///
    /// Fails with `AlreadyExists` if the reference is taken, even when racing
    /// another creator.
    async fn create_stack(&self, record: &StackRecord) -> BackendResult<()>;

    async fn read_stack(&self, reference: &StackReference) -> BackendResult<Option<StackRecord>>;

    /// Overwrite an existing stack record
    async fn write_stack(&self, record: &StackRecord) -> BackendResult<()>;

    /// Delete a stack record along with its snapshot and history
    async fn delete_stack(&self, reference: &StackReference) -> BackendResult<()>;

    /// Move a stack, with its snapshot and history, to a new reference
    async fn rename_stack(&self, from: &StackReference, to: &StackReference) -> BackendResult<()>;

    /// All stack records, sorted by reference
    async fn list_stacks(&self) -> BackendResult<Vec<StackRecord>>;

    async fn read_snapshot(&self, reference: &StackReference) -> BackendResult<Option<Snapshot>>;

    /// Replace the snapshot so readers see either the old or the new value
    async fn write_snapshot(
        &self,
        reference: &StackReference,
        snapshot: &Snapshot,
    ) -> BackendResult<()>;

    /// History entries, oldest first
    async fn read_history(&self, reference: &StackReference) -> BackendResult<Vec<UpdateInfo>>;

    async fn append_history(
        &self,
        reference: &StackReference,
        entry: &UpdateInfo,
    ) -> BackendResult<()>;

    /// Take the stack's lock without waiting
    ///
    /// Fails with `Locked` if another live lease exists. Expired leases are
    /// taken over.
    async fn acquire_lock(
        &self,
        reference: &StackReference,
        operation: &str,
    ) -> BackendResult<LockInfo>;

    /// Start a new lease period for a lock this caller holds
    ///
    /// Succeeds only while the stored lease is still `lock`'s, even if it has
    /// expired without being taken over. Fails with `Locked` when another
    /// lease replaced it and with `LeaseLost` when it was released.
    async fn renew_lock(
        &self,
        reference: &StackReference,
        lock: &LockInfo,
    ) -> BackendResult<LockInfo>;

    /// Release a lock acquired by `acquire_lock`
    async fn release_lock(
        &self,
        reference: &StackReference,
        lock: &LockInfo,
    ) -> BackendResult<()>;

    /// Remove the stack's lock if its id matches `lock_id`
    async fn force_unlock(&self, reference: &StackReference, lock_id: &str) -> BackendResult<()>;
}
