//! In-memory state store.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StoredState;
use crate::error::{Result, StateError};

/// State store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<StoredState>>,
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `state`.
    #[must_use]
    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            lock: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StoredState>> {
        Ok(self.state.lock().clone())
    }

    async fn save(&self, state: &StoredState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.state.lock() = None;
        *self.lock.lock() = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().is_some())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut slot = self.lock.lock();
        if let Some(existing) = slot.as_ref().filter(|lock| !lock.is_expired()) {
            return Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into());
        }
        let lock = LockInfo::for_holder(holder);
        *slot = Some(lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut slot = self.lock.lock();
        if slot.as_ref().is_some_and(|lock| lock.lock_id == lock_id) {
            *slot = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock.lock().as_ref().is_some_and(|lock| !lock.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("a").await.unwrap();
        store.release_lock("other").await.unwrap();
        assert!(store.is_locked().await.unwrap());
        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryStateStore::new();
        assert!(!store.exists().await.unwrap());
        store.save(&StoredState::new()).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
    }
}
