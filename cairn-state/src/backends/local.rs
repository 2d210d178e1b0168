//! Local file store
//!
//! Stores every stack under a root directory (default: `.cairn`):
//!
//! ```text
//! <root>/stacks/<organization>/<project>/<stack>/stack.json
//!                                               /snapshot.json
//!                                               /history.json
//! <root>/locks/<organization>/<project>/<stack>.lock
//! ```
//!
//! Files are replaced by writing a temporary sibling and renaming it over the
//! original. A new stack is assembled under `<root>/staging` and renamed into
//! place. Lock files are created with create-new semantics so only one
//! process can hold a stack's lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cairn_core::{Snapshot, StackReference};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendConfig, BackendError, BackendResult};
use crate::backends::memory::lock_timeout_from_config;
use crate::history::UpdateInfo;
use crate::lock::{DEFAULT_LOCK_TIMEOUT_SECS, LockInfo};
use crate::store::{StackRecord, StateStore};

const STACK_FILE: &str = "stack.json";
const SNAPSHOT_FILE: &str = "snapshot.json";
const HISTORY_FILE: &str = "history.json";

/// Local file store for development and single-machine use
pub struct LocalStore {
    root: PathBuf,
    lock_timeout_secs: i64,
}

impl LocalStore {
    /// Default state directory
    pub const DEFAULT_PATH: &'static str = ".cairn";

    /// Create a new LocalStore rooted at the default directory
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_PATH))
    }

    /// Create a new LocalStore rooted at a specific directory
    pub fn with_path(root: PathBuf) -> Self {
        Self {
            root,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout_secs: i64) -> Self {
        self.lock_timeout_secs = lock_timeout_secs;
        self
    }

    /// Create a LocalStore from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_PATH));
        let timeout = lock_timeout_from_config(config)?;

        Ok(Self::with_path(path).with_lock_timeout(timeout))
    }

    /// Get the state directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stacks_dir(&self) -> PathBuf {
        self.root.join("stacks")
    }

    fn stack_dir(&self, reference: &StackReference) -> PathBuf {
        self.stacks_dir()
            .join(reference.organization())
            .join(reference.project())
            .join(reference.name().as_str())
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn lock_path(&self, reference: &StackReference) -> PathBuf {
        self.root
            .join("locks")
            .join(reference.organization())
            .join(reference.project())
            .join(format!("{}.lock", reference.name()))
    }

    async fn require_stack(&self, reference: &StackReference) -> BackendResult<PathBuf> {
        let dir = self.stack_dir(reference);
        if fs::try_exists(dir.join(STACK_FILE)).await.map_err(io_error(&dir))? {
            Ok(dir)
        } else {
            Err(BackendError::not_found(reference))
        }
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> BackendError + '_ {
    move |e| BackendError::persistence(format!("{}: {}", path.display(), e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> BackendResult<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Replace `path` with the JSON form of `value` in one rename
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BackendResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|e| {
        BackendError::persistence(format!("Failed to serialize {}: {}", path.display(), e))
    })?;

    let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(io_error(path)(e));
    }
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// Immediate subdirectories of `dir`, or none if it does not exist
async fn subdirs(dir: &Path) -> BackendResult<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        if entry.file_type().await.map_err(io_error(dir))?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[async_trait]
impl StateStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    fn url(&self) -> String {
        let root = std::path::absolute(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("file://{}", root.display())
    }

    fn lock_timeout_secs(&self) -> i64 {
        self.lock_timeout_secs
    }

    async fn create_stack(&self, record: &StackRecord) -> BackendResult<()> {
        let dir = self.stack_dir(&record.reference);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        // The record is written aside and moved into place in one rename, so
        // a reference is only ever claimed by a complete stack.
        let staged = self.staging_dir().join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&staged).await.map_err(io_error(&staged))?;

        let result = match write_json_atomic(&staged.join(STACK_FILE), record).await {
            Ok(()) => match fs::rename(&staged, &dir).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let taken = fs::try_exists(dir.join(STACK_FILE)).await.unwrap_or(false);
                    if taken {
                        Err(BackendError::AlreadyExists(record.reference.to_string()))
                    } else {
                        Err(io_error(&dir)(e))
                    }
                }
            },
            Err(e) => Err(e),
        };

        let _ = fs::remove_dir_all(&staged).await;
        result
    }

    async fn read_stack(&self, reference: &StackReference) -> BackendResult<Option<StackRecord>> {
        read_json(&self.stack_dir(reference).join(STACK_FILE)).await
    }

    async fn write_stack(&self, record: &StackRecord) -> BackendResult<()> {
        let dir = self.require_stack(&record.reference).await?;
        write_json_atomic(&dir.join(STACK_FILE), record).await
    }

    async fn delete_stack(&self, reference: &StackReference) -> BackendResult<()> {
        let dir = self.require_stack(reference).await?;
        fs::remove_dir_all(&dir).await.map_err(io_error(&dir))
    }

    async fn rename_stack(&self, from: &StackReference, to: &StackReference) -> BackendResult<()> {
        let from_dir = self.require_stack(from).await?;
        let to_dir = self.stack_dir(to);

        if let Some(parent) = to_dir.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }
        match fs::create_dir(&to_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::AlreadyExists(to.to_string()));
            }
            Err(e) => return Err(io_error(&to_dir)(e)),
        }
        // Renaming onto the empty directory we just claimed replaces it.
        if let Err(e) = fs::rename(&from_dir, &to_dir).await {
            let _ = fs::remove_dir(&to_dir).await;
            return Err(io_error(&from_dir)(e));
        }

        let path = to_dir.join(STACK_FILE);
        let mut record: StackRecord = read_json(&path)
            .await?
            .ok_or_else(|| BackendError::not_found(to))?;
        record.reference = to.clone();
        write_json_atomic(&path, &record).await
    }

    async fn list_stacks(&self) -> BackendResult<Vec<StackRecord>> {
        let mut records = Vec::new();
        for org in subdirs(&self.stacks_dir()).await? {
            for project in subdirs(&org).await? {
                for stack in subdirs(&project).await? {
                    if let Some(record) = read_json::<StackRecord>(&stack.join(STACK_FILE)).await? {
                        records.push(record);
                    }
                }
            }
        }
        records.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(records)
    }

    async fn read_snapshot(&self, reference: &StackReference) -> BackendResult<Option<Snapshot>> {
        let dir = self.require_stack(reference).await?;
        read_json(&dir.join(SNAPSHOT_FILE)).await
    }

    async fn write_snapshot(
        &self,
        reference: &StackReference,
        snapshot: &Snapshot,
    ) -> BackendResult<()> {
        let dir = self.require_stack(reference).await?;
        write_json_atomic(&dir.join(SNAPSHOT_FILE), snapshot).await
    }

    async fn read_history(&self, reference: &StackReference) -> BackendResult<Vec<UpdateInfo>> {
        let dir = self.require_stack(reference).await?;
        Ok(read_json(&dir.join(HISTORY_FILE)).await?.unwrap_or_default())
    }

    async fn append_history(
        &self,
        reference: &StackReference,
        entry: &UpdateInfo,
    ) -> BackendResult<()> {
        let dir = self.require_stack(reference).await?;
        let path = dir.join(HISTORY_FILE);
        let mut history: Vec<UpdateInfo> = read_json(&path).await?.unwrap_or_default();
        history.push(entry.clone());
        write_json_atomic(&path, &history).await
    }

    async fn acquire_lock(
        &self,
        reference: &StackReference,
        operation: &str,
    ) -> BackendResult<LockInfo> {
        let path = self.lock_path(reference);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        let lock = LockInfo::with_timeout(reference.clone(), operation, self.lock_timeout_secs);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| BackendError::persistence(format!("Failed to serialize lock: {}", e)))?;

        // A second attempt is made only after removing an expired lock.
        for _ in 0..2 {
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match opened {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(content.as_bytes()).await?;
                        file.sync_all().await
                    }
                    .await;
                    if let Err(e) = written {
                        let _ = fs::remove_file(&path).await;
                        return Err(io_error(&path)(e));
                    }
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_error(&path)(e)),
            }

            match read_json::<LockInfo>(&path).await {
                Ok(Some(existing)) if existing.is_expired() => {
                    log::warn!(
                        "taking over expired lock {} on {} held by {}",
                        existing.id,
                        reference,
                        existing.who
                    );
                    match fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(io_error(&path)(e)),
                    }
                }
                Ok(Some(existing)) => return Err(BackendError::locked(reference, &existing)),
                // Released between our attempt and the read
                Ok(None) => {}
                // Another process is still writing its lock
                Err(_) => break,
            }
        }

        Err(BackendError::Locked {
            stack: reference.to_string(),
            lock_id: "unknown".to_string(),
            who: "unknown".to_string(),
            operation: "unknown".to_string(),
        })
    }

    async fn renew_lock(
        &self,
        reference: &StackReference,
        lock: &LockInfo,
    ) -> BackendResult<LockInfo> {
        let path = self.lock_path(reference);
        let mut existing: LockInfo = match read_json(&path).await? {
            Some(existing) => existing,
            None => return Err(BackendError::lease_lost(lock)),
        };
        if !existing.same_lease(lock) {
            return Err(BackendError::locked(reference, &existing));
        }

        existing.renew();
        write_json_atomic(&path, &existing).await?;
        Ok(existing)
    }

    async fn release_lock(&self, reference: &StackReference, lock: &LockInfo) -> BackendResult<()> {
        let path = self.lock_path(reference);
        let existing: LockInfo = read_json(&path)
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        fs::remove_file(&path).await.map_err(io_error(&path))
    }

    async fn force_unlock(&self, reference: &StackReference, lock_id: &str) -> BackendResult<()> {
        let path = self.lock_path(reference);
        if !fs::try_exists(&path).await.map_err(io_error(&path))? {
            return Err(BackendError::LockNotFound(lock_id.to_string()));
        }

        // Verify lock ID matches
        if let Ok(Some(existing)) = read_json::<LockInfo>(&path).await
            && existing.id != lock_id
        {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        fs::remove_file(&path).await.map_err(io_error(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StackTags;
    use cairn_core::resource::ResourceState;
    use tempfile::tempdir;

    fn reference(name: &str) -> StackReference {
        format!("acme/web/{}", name).parse().unwrap()
    }

    async fn store_with_stack(root: &Path, name: &str) -> LocalStore {
        let store = LocalStore::with_path(root.to_path_buf());
        store
            .create_stack(&StackRecord::new(reference(name), StackTags::new()))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_local_store_layout() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;

        let stack_file = dir.path().join("stacks/acme/web/dev/stack.json");
        assert!(stack_file.exists());

        let record = store.read_stack(&reference("dev")).await.unwrap().unwrap();
        assert_eq!(record.reference, reference("dev"));
    }

    #[tokio::test]
    async fn test_local_store_create_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;

        let err = store
            .create_stack(&StackRecord::new(reference("dev"), StackTags::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_local_store_create_leaves_no_partial_stack() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf());
        let r = reference("dev");

        // An interrupted create may leave an empty directory behind
        std::fs::create_dir_all(dir.path().join("stacks/acme/web/dev")).unwrap();
        assert!(store.read_stack(&r).await.unwrap().is_none());

        store
            .create_stack(&StackRecord::new(r.clone(), StackTags::new()))
            .await
            .unwrap();
        assert_eq!(store.read_stack(&r).await.unwrap().unwrap().reference, r);

        let err = store
            .create_stack(&StackRecord::new(r.clone(), StackTags::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));

        // Nothing staged survives either outcome
        let staged = std::fs::read_dir(dir.path().join("staging")).unwrap().count();
        assert_eq!(staged, 0);
        assert_eq!(store.list_stacks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_snapshot_read_write() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;
        let r = reference("dev");

        // Initially no snapshot
        assert!(store.read_snapshot(&r).await.unwrap().is_none());

        let mut snapshot = Snapshot::new();
        snapshot.upsert_resource(ResourceState::new("s3.bucket", "logs", "aws"));
        snapshot.advance();
        store.write_snapshot(&r, &snapshot).await.unwrap();

        let read = store.read_snapshot(&r).await.unwrap().unwrap();
        assert_eq!(read, snapshot);
        assert!(read.verify_checksum());

        // No temporary files are left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("stacks/acme/web/dev"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_local_store_missing_stack() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf());

        assert!(store.read_stack(&reference("dev")).await.unwrap().is_none());
        let err = store.read_snapshot(&reference("dev")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list_stacks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_store_invalid_snapshot() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;
        std::fs::write(dir.path().join("stacks/acme/web/dev/snapshot.json"), "{ nope").unwrap();

        let err = store.read_snapshot(&reference("dev")).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_local_store_list_sorted() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "prod").await;
        store
            .create_stack(&StackRecord::new(reference("dev"), StackTags::new()))
            .await
            .unwrap();
        store
            .create_stack(&StackRecord::new(
                "acme/api/dev".parse().unwrap(),
                StackTags::new(),
            ))
            .await
            .unwrap();

        let names: Vec<String> = store
            .list_stacks()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.reference.to_string())
            .collect();
        assert_eq!(names, vec!["acme/api/dev", "acme/web/dev", "acme/web/prod"]);
    }

    #[tokio::test]
    async fn test_local_store_rename_and_delete() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;
        let from = reference("dev");
        let to = reference("staging");
        store.write_snapshot(&from, &Snapshot::new()).await.unwrap();

        store.rename_stack(&from, &to).await.unwrap();
        assert!(store.read_stack(&from).await.unwrap().is_none());
        assert_eq!(
            store.read_stack(&to).await.unwrap().unwrap().reference,
            to
        );
        assert!(store.read_snapshot(&to).await.unwrap().is_some());

        store.delete_stack(&to).await.unwrap();
        assert!(store.read_stack(&to).await.unwrap().is_none());
        assert!(store.delete_stack(&to).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_store_rename_onto_existing() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;
        store
            .create_stack(&StackRecord::new(reference("prod"), StackTags::new()))
            .await
            .unwrap();

        let err = store
            .rename_stack(&reference("dev"), &reference("prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
        assert!(store.read_stack(&reference("dev")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_store_history_appends() {
        let dir = tempdir().unwrap();
        let store = store_with_stack(dir.path(), "dev").await;
        let r = reference("dev");
        assert!(store.read_history(&r).await.unwrap().is_empty());

        for status in [
            crate::history::UpdateStatus::Succeeded,
            crate::history::UpdateStatus::Failed,
        ] {
            let entry = UpdateInfo {
                kind: cairn_core::UpdateKind::Update,
                start_time: chrono::Utc::now(),
                end_time: chrono::Utc::now(),
                message: None,
                environment: Default::default(),
                config: Default::default(),
                status,
                error: None,
                resource_changes: Default::default(),
                serial: None,
            };
            store.append_history(&r, &entry).await.unwrap();
        }

        let history = store.read_history(&r).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, crate::history::UpdateStatus::Failed);
    }

    #[tokio::test]
    async fn test_local_store_lock_acquire_release() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf());
        let r = reference("dev");

        // Acquire lock
        let lock = store.acquire_lock(&r, "update").await.unwrap();
        assert!(dir.path().join("locks/acme/web/dev.lock").exists());

        // Try to acquire again - should fail
        let err = store.acquire_lock(&r, "update").await.unwrap_err();
        assert!(err.is_conflict());

        // Release lock
        store.release_lock(&r, &lock).await.unwrap();
        assert!(!dir.path().join("locks/acme/web/dev.lock").exists());

        // Should be able to acquire again
        let lock2 = store.acquire_lock(&r, "update").await.unwrap();
        store.release_lock(&r, &lock2).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_store_expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf()).with_lock_timeout(-1);
        let r = reference("dev");

        let stale = store.acquire_lock(&r, "update").await.unwrap();
        let fresh = store.acquire_lock(&r, "update").await.unwrap();
        assert_ne!(stale.id, fresh.id);
    }

    #[tokio::test]
    async fn test_local_store_renew_lock() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf()).with_lock_timeout(60);
        let r = reference("dev");

        let lock = store.acquire_lock(&r, "update").await.unwrap();
        let renewed = store.renew_lock(&r, &lock).await.unwrap();
        assert!(renewed.same_lease(&lock));
        assert!(renewed.renewed >= lock.renewed);
        assert_eq!(renewed.lease(), lock.lease());

        // The renewed lease is what is on disk
        let err = store.acquire_lock(&r, "destroy").await.unwrap_err();
        assert!(err.is_conflict());
        store.release_lock(&r, &renewed).await.unwrap();

        let err = store.renew_lock(&r, &lock).await.unwrap_err();
        assert!(matches!(err, BackendError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn test_local_store_renew_after_takeover_conflicts() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf()).with_lock_timeout(-1);
        let r = reference("dev");

        let stale = store.acquire_lock(&r, "update").await.unwrap();
        let fresh = store.acquire_lock(&r, "update").await.unwrap();
        match store.renew_lock(&r, &stale).await.unwrap_err() {
            BackendError::Locked { lock_id, .. } => assert_eq!(lock_id, fresh.id),
            other => panic!("Expected Locked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_store_concurrent_lock() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(LocalStore::with_path(dir.path().to_path_buf()));
        let r = reference("dev");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let r = r.clone();
                tokio::spawn(async move { store.acquire_lock(&r, "update").await })
            })
            .collect();

        let mut acquired = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => acquired += 1,
                Err(e) => assert!(e.is_conflict()),
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn test_local_store_force_unlock() {
        let dir = tempdir().unwrap();
        let store = LocalStore::with_path(dir.path().to_path_buf());
        let r = reference("dev");

        let err = store.force_unlock(&r, "missing").await.unwrap_err();
        assert!(matches!(err, BackendError::LockNotFound(_)));

        let lock = store.acquire_lock(&r, "update").await.unwrap();
        let err = store.force_unlock(&r, "wrong-id").await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));

        store.force_unlock(&r, &lock.id).await.unwrap();
        assert!(!dir.path().join("locks/acme/web/dev.lock").exists());
    }

    #[test]
    fn test_local_store_from_config() {
        let config = BackendConfig::new("local")
            .with_attribute("path", serde_json::json!("/tmp/cairn-state"))
            .with_attribute("lock_timeout_secs", serde_json::json!(60));
        let store = LocalStore::from_config(&config).unwrap();
        assert_eq!(store.root(), Path::new("/tmp/cairn-state"));
        assert_eq!(store.lock_timeout_secs(), 60);
        assert_eq!(store.url(), "file:///tmp/cairn-state");

        let store = LocalStore::from_config(&BackendConfig::new("local")).unwrap();
        assert_eq!(store.root(), Path::new(LocalStore::DEFAULT_PATH));
    }
}
