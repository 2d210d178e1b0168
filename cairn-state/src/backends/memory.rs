//! In-memory store
//!
//! Keeps everything in process memory. Useful for tests and for embedding a
//! backend whose state does not need to outlive the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cairn_core::{Snapshot, StackReference};

use crate::backend::{BackendConfig, BackendError, BackendResult};
use crate::history::UpdateInfo;
use crate::lock::{DEFAULT_LOCK_TIMEOUT_SECS, LockInfo};
use crate::store::{StackRecord, StateStore};

struct StackEntry {
    record: StackRecord,
    snapshot: Option<Snapshot>,
    history: Vec<UpdateInfo>,
}

impl StackEntry {
    fn new(record: StackRecord) -> Self {
        Self {
            record,
            snapshot: None,
            history: Vec::new(),
        }
    }
}

pub struct MemoryStore {
    stacks: Mutex<HashMap<StackReference, StackEntry>>,
    locks: Mutex<HashMap<StackReference, LockInfo>>,
    lock_timeout_secs: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_lock_timeout(lock_timeout_secs: i64) -> Self {
        Self {
            stacks: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_timeout_secs,
        }
    }

    /// Create a MemoryStore from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let timeout = lock_timeout_from_config(config)?;
        Ok(Self::with_lock_timeout(timeout))
    }

    fn stacks(&self) -> BackendResult<MutexGuard<'_, HashMap<StackReference, StackEntry>>> {
        self.stacks
            .lock()
            .map_err(|_| BackendError::persistence("stack table lock poisoned"))
    }

    fn locks(&self) -> BackendResult<MutexGuard<'_, HashMap<StackReference, LockInfo>>> {
        self.locks
            .lock()
            .map_err(|_| BackendError::persistence("lock table lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read `lock_timeout_secs`, falling back to the default lease
pub(crate) fn lock_timeout_from_config(config: &BackendConfig) -> BackendResult<i64> {
    match config.get_u64("lock_timeout_secs") {
        Some(secs) => i64::try_from(secs)
            .map_err(|_| BackendError::configuration("lock_timeout_secs is too large")),
        None if config.attributes.contains_key("lock_timeout_secs") => Err(
            BackendError::configuration("lock_timeout_secs must be a non-negative integer"),
        ),
        None => Ok(DEFAULT_LOCK_TIMEOUT_SECS),
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn url(&self) -> String {
        "memory://".to_string()
    }

    fn lock_timeout_secs(&self) -> i64 {
        self.lock_timeout_secs
    }

    async fn create_stack(&self, record: &StackRecord) -> BackendResult<()> {
        let mut stacks = self.stacks()?;
        if stacks.contains_key(&record.reference) {
            return Err(BackendError::AlreadyExists(record.reference.to_string()));
        }
        stacks.insert(record.reference.clone(), StackEntry::new(record.clone()));
        Ok(())
    }

    async fn read_stack(&self, reference: &StackReference) -> BackendResult<Option<StackRecord>> {
        Ok(self.stacks()?.get(reference).map(|e| e.record.clone()))
    }

    async fn write_stack(&self, record: &StackRecord) -> BackendResult<()> {
        let mut stacks = self.stacks()?;
        let entry = stacks
            .get_mut(&record.reference)
            .ok_or_else(|| BackendError::not_found(&record.reference))?;
        entry.record = record.clone();
        Ok(())
    }

    async fn delete_stack(&self, reference: &StackReference) -> BackendResult<()> {
        self.stacks()?
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| BackendError::not_found(reference))
    }

    async fn rename_stack(&self, from: &StackReference, to: &StackReference) -> BackendResult<()> {
        let mut stacks = self.stacks()?;
        if stacks.contains_key(to) {
            return Err(BackendError::AlreadyExists(to.to_string()));
        }
        let mut entry = stacks
            .remove(from)
            .ok_or_else(|| BackendError::not_found(from))?;
        entry.record.reference = to.clone();
        stacks.insert(to.clone(), entry);
        Ok(())
    }

    async fn list_stacks(&self) -> BackendResult<Vec<StackRecord>> {
        let mut records: Vec<StackRecord> =
            self.stacks()?.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(records)
    }

    async fn read_snapshot(&self, reference: &StackReference) -> BackendResult<Option<Snapshot>> {
        let stacks = self.stacks()?;
        let entry = stacks
            .get(reference)
            .ok_or_else(|| BackendError::not_found(reference))?;
        Ok(entry.snapshot.clone())
    }

    async fn write_snapshot(
        &self,
        reference: &StackReference,
        snapshot: &Snapshot,
    ) -> BackendResult<()> {
        let mut stacks = self.stacks()?;
        let entry = stacks
            .get_mut(reference)
            .ok_or_else(|| BackendError::not_found(reference))?;
        entry.snapshot = Some(snapshot.clone());
        log::debug!("wrote snapshot serial {} for {}", snapshot.serial, reference);
        Ok(())
    }

    async fn read_history(&self, reference: &StackReference) -> BackendResult<Vec<UpdateInfo>> {
        let stacks = self.stacks()?;
        let entry = stacks
            .get(reference)
            .ok_or_else(|| BackendError::not_found(reference))?;
        Ok(entry.history.clone())
    }

    async fn append_history(
        &self,
        reference: &StackReference,
        entry: &UpdateInfo,
    ) -> BackendResult<()> {
        let mut stacks = self.stacks()?;
        let stack = stacks
            .get_mut(reference)
            .ok_or_else(|| BackendError::not_found(reference))?;
        stack.history.push(entry.clone());
        Ok(())
    }

    async fn acquire_lock(
        &self,
        reference: &StackReference,
        operation: &str,
    ) -> BackendResult<LockInfo> {
        let mut locks = self.locks()?;
        if let Some(existing) = locks.get(reference) {
            if !existing.is_expired() {
                return Err(BackendError::locked(reference, existing));
            }
            log::warn!(
                "taking over expired lock {} on {} held by {}",
                existing.id,
                reference,
                existing.who
            );
        }

        let lock = LockInfo::with_timeout(reference.clone(), operation, self.lock_timeout_secs);
        locks.insert(reference.clone(), lock.clone());
        Ok(lock)
    }

    async fn renew_lock(
        &self,
        reference: &StackReference,
        lock: &LockInfo,
    ) -> BackendResult<LockInfo> {
        let mut locks = self.locks()?;
        match locks.get_mut(reference) {
            None => Err(BackendError::lease_lost(lock)),
            Some(existing) if !existing.same_lease(lock) => {
                Err(BackendError::locked(reference, existing))
            }
            Some(existing) => {
                existing.renew();
                Ok(existing.clone())
            }
        }
    }

    async fn release_lock(&self, reference: &StackReference, lock: &LockInfo) -> BackendResult<()> {
        let mut locks = self.locks()?;
        match locks.get(reference) {
            None => Err(BackendError::LockNotFound(lock.id.clone())),
            Some(existing) if existing.id != lock.id => Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id.clone(),
            }),
            Some(_) => {
                locks.remove(reference);
                Ok(())
            }
        }
    }

    async fn force_unlock(&self, reference: &StackReference, lock_id: &str) -> BackendResult<()> {
        let mut locks = self.locks()?;
        match locks.get(reference) {
            None => Err(BackendError::LockNotFound(lock_id.to_string())),
            Some(existing) if existing.id != lock_id => Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id.clone(),
            }),
            Some(_) => {
                locks.remove(reference);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StackTags;

    fn reference(name: &str) -> StackReference {
        format!("acme/web/{}", name).parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let store = MemoryStore::new();
        let record = StackRecord::new(reference("dev"), StackTags::new());

        store.create_stack(&record).await.unwrap();
        let err = store.create_stack(&record).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let store = MemoryStore::new();
        let r = reference("dev");
        store
            .create_stack(&StackRecord::new(r.clone(), StackTags::new()))
            .await
            .unwrap();
        assert!(store.read_snapshot(&r).await.unwrap().is_none());

        let mut snapshot = Snapshot::new();
        snapshot.advance();
        store.write_snapshot(&r, &snapshot).await.unwrap();
        assert_eq!(store.read_snapshot(&r).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_rename_moves_everything() {
        let store = MemoryStore::new();
        let from = reference("dev");
        let to = reference("staging");
        store
            .create_stack(&StackRecord::new(from.clone(), StackTags::new()))
            .await
            .unwrap();
        store.write_snapshot(&from, &Snapshot::new()).await.unwrap();

        store.rename_stack(&from, &to).await.unwrap();

        assert!(store.read_stack(&from).await.unwrap().is_none());
        let record = store.read_stack(&to).await.unwrap().unwrap();
        assert_eq!(record.reference, to);
        assert!(store.read_snapshot(&to).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let store = MemoryStore::new();
        let r = reference("dev");

        let lock = store.acquire_lock(&r, "update").await.unwrap();
        let err = store.acquire_lock(&r, "destroy").await.unwrap_err();
        assert!(err.is_conflict());

        // Other stacks are independent
        let other = store.acquire_lock(&reference("prod"), "update").await.unwrap();
        store.release_lock(&reference("prod"), &other).await.unwrap();

        store.release_lock(&r, &lock).await.unwrap();
        let lock = store.acquire_lock(&r, "destroy").await.unwrap();
        store.release_lock(&r, &lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let store = MemoryStore::with_lock_timeout(-1);
        let r = reference("dev");

        let stale = store.acquire_lock(&r, "update").await.unwrap();
        let fresh = store.acquire_lock(&r, "update").await.unwrap();
        assert_ne!(stale.id, fresh.id);

        let err = store.release_lock(&r, &stale).await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));
    }

    #[tokio::test]
    async fn test_renew_extends_own_lease() {
        let store = MemoryStore::with_lock_timeout(60);
        let r = reference("dev");
        let mut lock = store.acquire_lock(&r, "update").await.unwrap();
        lock.expires = lock.renewed;

        let renewed = store.renew_lock(&r, &lock).await.unwrap();
        assert!(renewed.same_lease(&lock));
        assert!(renewed.time_remaining().num_seconds() > 55);
        store.release_lock(&r, &renewed).await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_after_takeover_conflicts() {
        let store = MemoryStore::with_lock_timeout(-1);
        let r = reference("dev");

        let stale = store.acquire_lock(&r, "update").await.unwrap();
        let fresh = store.acquire_lock(&r, "destroy").await.unwrap();
        match store.renew_lock(&r, &stale).await.unwrap_err() {
            BackendError::Locked { lock_id, .. } => assert_eq!(lock_id, fresh.id),
            other => panic!("Expected Locked, got {:?}", other),
        }

        store.release_lock(&r, &fresh).await.unwrap();
        let err = store.renew_lock(&r, &stale).await.unwrap_err();
        assert!(matches!(err, BackendError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let store = MemoryStore::new();
        let r = reference("dev");
        let lock = store.acquire_lock(&r, "update").await.unwrap();

        let err = store.force_unlock(&r, "wrong-id").await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));

        store.force_unlock(&r, &lock.id).await.unwrap();
        let err = store.force_unlock(&r, &lock.id).await.unwrap_err();
        assert!(matches!(err, BackendError::LockNotFound(_)));
    }

    #[test]
    fn test_lock_timeout_from_config() {
        let config = BackendConfig::new("memory");
        assert_eq!(
            lock_timeout_from_config(&config).unwrap(),
            DEFAULT_LOCK_TIMEOUT_SECS
        );

        let config = config.with_attribute("lock_timeout_secs", serde_json::json!(30));
        assert_eq!(lock_timeout_from_config(&config).unwrap(), 30);

        let config = BackendConfig::new("memory")
            .with_attribute("lock_timeout_secs", serde_json::json!("soon"));
        assert!(lock_timeout_from_config(&config).is_err());
    }
}
