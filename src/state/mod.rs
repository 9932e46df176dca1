//! Actual-state management.
//!
//! This module provides persistent storage for the actual resolution and
//! its revision history, state locking, and the concurrency-safe updater
//! actions use to mutate actual state.

mod local;
mod lock;
mod memory;
mod store;
mod types;
mod updater;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{
    ActionCounts, Revision, RevisionStatus, StoredState, MAX_REVISIONS, STATE_VERSION,
};
pub use updater::SharedActualState;
