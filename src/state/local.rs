//! Local file-based state storage.
//!
//! State lives in `.hostwright/state.json` next to the configuration. Writes
//! go to a temporary file that is renamed over the previous state, and a
//! lock file guards against two applies running at once.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{ManagedState, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".hostwright";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store in a given directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// Creates a store from an explicit state file path. The lock file sits
    /// next to it.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            state_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create {}: {e}", temp_path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename {}: {e}", temp_path.display())))?;
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read lock file: {e}"),
        })?;
        let lock = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;
        Ok(Some(lock))
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ManagedState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }
        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read state file: {e}"),
        })?;
        let state: ManagedState = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &ManagedState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;
        self.write_atomic(&self.state_path, &content).await?;
        info!(
            "Saved state ({} resources) to {}",
            state.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            warn!("Taking over expired lock held by {}", existing.holder);
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::new(&holder, operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        debug!(
            "Acquired state lock {} for {operation} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                debug!("Released state lock {lock_id}");
            }
            Some(existing) => {
                warn!("Lock {lock_id} was taken over by {}, leaving it", existing.holder);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            warn!("Forcibly removing lock held by {}", existing.holder);
        }
        self.delete_lock_file().await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostwrightError;
    use tempfile::TempDir;

    fn store() -> (LocalStateStore, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        (LocalStateStore::with_base_dir(dir.path().join(STATE_DIR)), dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _dir) = store();
        assert!(store.load().await.expect("load").is_none());

        let mut state = ManagedState::new();
        state.config_hash = String::from("abc123");
        store.save(&state).await.expect("save");

        let loaded = store.load().await.expect("load").expect("state");
        assert_eq!(loaded.config_hash, "abc123");
        assert!(!store.state_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _dir) = store();
        let mut state = ManagedState::new();
        state.version = String::from("0");
        store.save(&state).await.expect("save");

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(HostwrightError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let (store, _dir) = store();
        let lock = store.acquire_lock("ci-1", "apply").await.expect("lock");

        let result = store.acquire_lock("ci-2", "apply").await;
        assert!(matches!(
            result,
            Err(HostwrightError::State(StateError::LockedByOther { ref holder, .. })) if holder == "ci-1"
        ));

        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(store.lock_info().await.expect("info").is_none());
        store.acquire_lock("ci-2", "apply").await.expect("lock after release");
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _dir) = store();
        store.acquire_lock("ci", "destroy").await.expect("lock");

        store.release_lock("someone-else").await.expect("release");
        assert!(store.lock_info().await.expect("info").is_some());

        store.force_unlock().await.expect("force unlock");
        assert!(store.lock_info().await.expect("info").is_none());
    }
}
