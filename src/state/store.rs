//! Persistence of the actual-state document.
//!
//! A store holds one [`StoredState`]: the actual resolution of the last
//! apply and its revision history. Apply runs hold the store's lock for the
//! whole pass, from loading the actual state to saving the new one.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::StoredState;
use crate::error::Result;

/// Backend keeping the actual-state document and its lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the document, `None` before the first apply.
    async fn load(&self) -> Result<Option<StoredState>>;

    /// Replaces the document.
    async fn save(&self, state: &StoredState) -> Result<()>;

    /// Removes the document and any lock.
    async fn delete(&self) -> Result<()>;

    /// Returns true once a document has been saved.
    async fn exists(&self) -> Result<bool>;

    /// Takes the apply lock for `holder`.
    ///
    /// Fails with `LockedByOther` while another holder's lock is unexpired.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock with `lock_id`. Other locks are left in place.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Current lock, expired or not.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Returns true while an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool>;

    /// Short backend name for logs.
    fn backend_type(&self) -> &'static str;

    /// Reads the document, or an empty one before the first apply.
    async fn load_or_default(&self) -> Result<StoredState> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Releases whatever lock is held, returning it.
    ///
    /// Used to recover from an apply that died while holding the lock.
    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let current = self.get_lock_info().await?;
        if let Some(lock) = &current {
            self.release_lock(&lock.lock_id).await?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    #[tokio::test]
    async fn test_force_unlock_releases_foreign_lock() {
        let store: Box<dyn StateStore> = Box::new(MemoryStateStore::new());
        let lock = store.acquire_lock("crashed-run").await.unwrap();

        let released = store.force_unlock().await.unwrap();

        assert_eq!(released.map(|l| l.lock_id), Some(lock.lock_id));
        assert!(!store.is_locked().await.unwrap());
        assert!(store.force_unlock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_or_default_before_first_save() {
        let store = MemoryStateStore::new();
        let state = store.load_or_default().await.unwrap();
        assert!(state.actual.component_instances.is_empty());
        assert!(state.revisions.is_empty());
    }
}
