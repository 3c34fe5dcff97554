//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::ManagedState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state. Returns `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<ManagedState>>;

    /// Saves the state.
    async fn save(&self, state: &ManagedState) -> Result<()>;

    /// Acquires the state lock for an operation.
    ///
    /// Fails with `LockedByOther` if a live lock is held.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock whoever holds it.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information, expired or not.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Returns a description of where the state lives.
    fn location(&self) -> String;
}
