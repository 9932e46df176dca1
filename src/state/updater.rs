//! Concurrency-safe access to actual state while actions apply.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StateError;
use crate::resolve::{ComponentInstance, ComponentInstanceMap, PolicyResolution};

/// Actual state shared by concurrently applying actions.
///
/// Writes to one key are serialized by a per-key lock; writes to different
/// keys run in parallel. A mutation works on a private copy of the
/// instance and swaps it in under the map lock, so readers only ever see a
/// fully updated instance. A key's lock is dropped once its instance is
/// deleted and no other writer is waiting on it.
#[derive(Debug, Default)]
pub struct SharedActualState {
    instances: RwLock<ComponentInstanceMap>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SharedActualState {
    /// Wraps a resolution's instances.
    #[must_use]
    pub fn new(actual: &PolicyResolution) -> Self {
        Self {
            instances: RwLock::new(actual.component_instances.clone()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a copy of an instance.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ComponentInstance> {
        self.instances.read().get(key).cloned()
    }

    /// Returns true if the instance exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.instances.read().contains_key(key)
    }

    /// Atomically updates an existing instance.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InstanceNotFound`] if the instance does not
    /// exist; nothing is modified then.
    pub fn update_component_instance<F>(
        &self,
        key: &str,
        mutate: F,
    ) -> Result<ComponentInstance, StateError>
    where
        F: FnOnce(&mut ComponentInstance),
    {
        let lock = self.key_lock(key);
        let _held = lock.lock();

        let mut instance = self.get(key).ok_or_else(|| StateError::InstanceNotFound {
            key: key.to_string(),
        })?;
        mutate(&mut instance);
        self.instances
            .write()
            .insert(key.to_string(), instance.clone());
        Ok(instance)
    }

    /// Inserts or replaces an instance.
    pub fn create_component_instance(&self, instance: ComponentInstance) {
        let key = instance.key.key();
        let lock = self.key_lock(&key);
        let _held = lock.lock();
        self.instances.write().insert(key, instance);
    }

    /// Removes an instance, returning it if it existed.
    pub fn delete_component_instance(&self, key: &str) -> Option<ComponentInstance> {
        let lock = self.key_lock(key);
        let _held = lock.lock();
        let removed = self.instances.write().remove(key);

        // Held by the map and by us only: no writer can be waiting.
        let mut locks = self.key_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        removed
    }

    /// Returns a copy of every instance.
    #[must_use]
    pub fn snapshot(&self) -> ComponentInstanceMap {
        self.instances.read().clone()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Returns true if there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.key_locks
                .lock()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{instance, resolution};

    #[test]
    fn test_update_missing_instance() {
        let state = SharedActualState::default();
        let err = state
            .update_component_instance("nope", |i| i.add_edge("x"))
            .unwrap_err();
        assert!(matches!(err, StateError::InstanceNotFound { .. }));
        assert!(state.is_empty());
    }

    #[test]
    fn test_concurrent_updates_on_one_key() {
        let db = instance("db", "primary", &[]);
        let key = db.key.key();
        let state = Arc::new(SharedActualState::new(&resolution(&[&db])));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                let key = key.clone();
                std::thread::spawn(move || {
                    state
                        .update_component_instance(&key, |instance| {
                            instance.add_dependency(&format!("main:dependency:d{i}"), i);
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every writer's change survives.
        assert_eq!(state.get(&key).unwrap().dependency_keys.len(), 9);
    }

    #[test]
    fn test_create_and_delete() {
        let state = SharedActualState::default();
        let web = instance("web", "app", &[]);
        state.create_component_instance(web.clone());
        assert!(state.contains(&web.key.key()));
        assert!(state.delete_component_instance(&web.key.key()).is_some());
        assert!(state.delete_component_instance(&web.key.key()).is_none());
    }

    #[test]
    fn test_delete_drops_key_lock() {
        let state = SharedActualState::default();
        let web = instance("web", "app", &[]);
        let db = instance("db", "primary", &[]);
        state.create_component_instance(web.clone());
        state.create_component_instance(db);
        assert_eq!(state.key_locks.lock().len(), 2);

        state.delete_component_instance(&web.key.key());

        assert_eq!(state.key_locks.lock().len(), 1);
        assert!(!state.key_locks.lock().contains_key(&web.key.key()));
    }

    #[test]
    fn test_delete_keeps_lock_another_writer_holds() {
        let state = SharedActualState::default();
        let web = instance("web", "app", &[]);
        let key = web.key.key();
        state.create_component_instance(web);

        let waiting = state.key_lock(&key);
        state.delete_component_instance(&key);

        assert!(state.key_locks.lock().contains_key(&key));
        drop(waiting);
    }
}
