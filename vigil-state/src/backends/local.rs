//! Local file backend
//!
//! State is a pretty-printed JSON file (default: vigil.state.json). The lock
//! is a sibling `.lock` file holding the serialized [`LockInfo`], published
//! whole via a hard link so it is never observed half written.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "vigil.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        match config.attributes.get("path") {
            None => Ok(Self::new()),
            Some(_) => config
                .get_string("path")
                .filter(|p| !p.is_empty())
                .map(Self::with_path)
                .ok_or_else(|| {
                    BackendError::configuration("local backend path must be a non-empty string")
                }),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        let content = match tokio::fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        tokio::fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }

    /// Place a fully written lock file, failing if one already exists
    ///
    /// The content goes to a private file first and is hard-linked into
    /// place, so readers never observe a partially written lock.
    async fn publish_lock(&self, content: &str) -> BackendResult<bool> {
        let staged = self.sibling("staged");
        tokio::fs::write(&staged, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;

        let linked = tokio::fs::hard_link(&staged, &self.lock_path).await;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!("Failed to remove {}: {}", staged.display(), e);
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(BackendError::Io(format!("Failed to write lock file: {}", e))),
        }
    }

    /// Remove `expired` if it is still the lock on disk
    ///
    /// The file is renamed aside before inspection; a live lock placed by
    /// another run in the meantime is linked back.
    async fn clear_expired_lock(&self, expired: &LockInfo) -> BackendResult<()> {
        let aside = self.sibling("expired");
        match tokio::fs::rename(&self.lock_path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BackendError::Io(format!("Failed to move lock file: {}", e))),
        }

        let moved: Option<LockInfo> = tokio::fs::read_to_string(&aside)
            .await
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());

        if moved.as_ref().is_some_and(|m| m.id != expired.id) {
            if let Err(e) = tokio::fs::hard_link(&aside, &self.lock_path).await {
                warn!("Failed to restore lock file: {}", e);
            }
        } else {
            warn!(
                "Taking over expired lock {} held by {}",
                expired.id, expired.who
            );
        }

        tokio::fs::remove_file(&aside)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }

    /// A uniquely named file next to the lock
    fn sibling(&self, purpose: &str) -> PathBuf {
        self.lock_path
            .with_extension(format!("lock.{}.{}", uuid::Uuid::new_v4(), purpose))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn ensure_parent(path: &Path) -> BackendResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to create {}: {}", parent.display(), e))),
        _ => Ok(()),
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        if state.version > StateFile::CURRENT_VERSION {
            return Err(BackendError::InvalidState(format!(
                "state file version {} is newer than supported version {}",
                state.version,
                StateFile::CURRENT_VERSION
            )));
        }

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        ensure_parent(&self.state_path).await?;

        // Write then rename so a crash never leaves a truncated state file
        let tmp_path = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;
        tokio::fs::rename(&tmp_path, &self.state_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        ensure_parent(&self.lock_path).await?;

        let lock = LockInfo::new(operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        // One retry after clearing an expired lock; losing that race means
        // another run now holds a live lock
        for _ in 0..2 {
            if self.publish_lock(&content).await? {
                debug!("Acquired lock {} for {}", lock.id, operation);
                return Ok(lock);
            }

            match self.read_lock().await {
                Ok(Some(existing)) if !existing.is_expired() => {
                    return Err(BackendError::locked(&existing));
                }
                Ok(Some(existing)) => self.clear_expired_lock(&existing).await?,
                Ok(None) => {}
                Err(e) => {
                    return Err(BackendError::InvalidState(format!(
                        "{} (remove {} with force-unlock if no other run holds it)",
                        e,
                        self.lock_path.display()
                    )));
                }
            }
        }

        match self.read_lock().await? {
            Some(existing) => Err(BackendError::locked(&existing)),
            None => Err(BackendError::Io(
                "lock file keeps changing, another run is contending for it".to_string(),
            )),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        self.remove_lock().await?;
        debug!("Released lock {}", lock.id);
        Ok(())
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        match self.read_lock().await {
            Ok(None) => return Err(BackendError::LockNotFound(lock_id.to_string())),
            Ok(Some(existing)) if existing.id != lock_id => {
                return Err(BackendError::LockMismatch {
                    expected: lock_id.to_string(),
                    actual: existing.id,
                });
            }
            Ok(Some(_)) => {}
            Err(e) => warn!("Removing unreadable lock file: {}", e),
        }

        self.remove_lock().await?;
        warn!("Force-released lock {}", lock_id);
        Ok(())
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;
    use vigil_core::resource::Value;

    use crate::state::ResourceState;

    #[tokio::test]
    async fn test_local_backend_read_write() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        assert!(backend.read_state().await.unwrap().is_none());

        let mut state_file = StateFile::new();
        state_file.upsert_resource(
            ResourceState::new("backup_selection", "daily_db", "aws").with_identifier("sel-1"),
        );
        state_file.increment_serial();
        backend.write_state(&state_file).await.unwrap();

        let read_state = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read_state.serial, 1);
        assert_eq!(read_state.lineage, state_file.lineage);
        assert_eq!(read_state.resources.len(), 1);
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/prod/vigil.state.json");
        let backend = LocalBackend::with_path(&path);

        backend.write_state(&StateFile::new()).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_state_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = LocalBackend::with_path(path).read_state().await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidState(_)));
    }

    #[tokio::test]
    async fn newer_state_version_is_rejected() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let mut state = StateFile::new();
        state.version = StateFile::CURRENT_VERSION + 1;
        backend.write_state(&state).await.unwrap();

        let err = backend.read_state().await.unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[tokio::test]
    async fn test_local_backend_locking() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_eq!(lock.operation, "apply");
        assert!(backend.lock_path().exists());

        match backend.acquire_lock("destroy").await {
            Err(BackendError::Locked { lock_id, .. }) => assert_eq!(lock_id, lock.id),
            other => panic!("Expected Locked error, got {:?}", other.map(|l| l.id)),
        }

        backend.release_lock(&lock).await.unwrap();
        assert!(!backend.lock_path().exists());

        let lock2 = backend.acquire_lock("destroy").await.unwrap();
        assert_eq!(lock2.operation, "destroy");
        backend.release_lock(&lock2).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout("apply", -1);
        std::fs::write(backend.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = backend.acquire_lock("apply").await.unwrap();
        assert_ne!(lock.id, stale.id);
        backend.release_lock(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_lock_is_left_in_place() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        std::fs::write(backend.lock_path(), "").unwrap();

        let err = backend.acquire_lock("apply").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidState(_)));
        assert!(err.to_string().contains("force-unlock"));
        assert_eq!(std::fs::read_to_string(backend.lock_path()).unwrap(), "");
    }

    #[tokio::test]
    async fn force_unlock_clears_unreadable_lock() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));
        std::fs::write(backend.lock_path(), "{ \"id\": ").unwrap();

        backend.force_unlock("anything").await.unwrap();
        assert!(!backend.lock_path().exists());

        let lock = backend.acquire_lock("apply").await.unwrap();
        backend.release_lock(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn clearing_an_expired_lock_keeps_a_newer_one() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout("apply", -1);
        let live = backend.acquire_lock("apply").await.unwrap();

        backend.clear_expired_lock(&stale).await.unwrap();
        let on_disk = backend.read_lock().await.unwrap().unwrap();
        assert_eq!(on_disk.id, live.id);
    }

    #[tokio::test]
    async fn locking_leaves_no_side_files() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let stale = LockInfo::with_timeout("apply", -1);
        std::fs::write(backend.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();
        let lock = backend.acquire_lock("apply").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("test.state.lock")]);
        backend.release_lock(&lock).await.unwrap();
    }

    #[tokio::test]
    async fn release_checks_lock_id() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let held = backend.acquire_lock("apply").await.unwrap();
        let other = LockInfo::new("apply");

        let err = backend.release_lock(&other).await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));
        assert!(backend.lock_path().exists());

        backend.release_lock(&held).await.unwrap();
        let err = backend.release_lock(&held).await.unwrap_err();
        assert!(matches!(err, BackendError::LockNotFound(_)));
    }

    #[tokio::test]
    async fn force_unlock_requires_matching_id() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("test.state.json"));

        let err = backend.force_unlock("missing").await.unwrap_err();
        assert!(matches!(err, BackendError::LockNotFound(_)));

        let lock = backend.acquire_lock("apply").await.unwrap();
        let err = backend.force_unlock("wrong-id").await.unwrap_err();
        assert!(matches!(err, BackendError::LockMismatch { .. }));

        backend.force_unlock(&lock.id).await.unwrap();
        assert!(!backend.lock_path().exists());
    }

    #[test]
    fn test_local_backend_from_config() {
        let backend = LocalBackend::from_config(&BackendConfig::new("local")).unwrap();
        assert_eq!(backend.state_path(), Path::new("vigil.state.json"));
        assert_eq!(backend.lock_path(), Path::new("vigil.state.lock"));
    }

    #[test]
    fn test_local_backend_custom_path() {
        let backend =
            LocalBackend::from_config(&BackendConfig::local("custom.state.json")).unwrap();
        assert_eq!(backend.state_path(), Path::new("custom.state.json"));
    }

    #[test]
    fn invalid_path_is_a_configuration_error() {
        let config = BackendConfig {
            backend_type: "local".to_string(),
            attributes: HashMap::from([("path".to_string(), Value::Bool(true))]),
        };
        let err = LocalBackend::from_config(&config).err().unwrap();
        assert!(matches!(err, BackendError::Configuration(_)));

        let err = LocalBackend::from_config(&BackendConfig::local("")).err().unwrap();
        assert!(matches!(err, BackendError::Configuration(_)));
    }
}
