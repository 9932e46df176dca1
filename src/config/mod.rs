//! Configuration module for the policy orchestrator.
//!
//! This module handles:
//! - Deserializing `orchestrator.yaml` into [`EngineConfig`]
//! - Environment overrides and `.env` loading
//! - Loading policy, user and secret documents
//! - Hashing policies and keys for change detection

mod hash;
mod loader;
mod settings;

pub use hash::KeyHasher;
pub use loader::{find_config_file, ConfigLoader, PolicyLoader, DEFAULT_CONFIG_FILES};
pub use settings::{
    ApplyConfig, EngineConfig, LoggingConfig, PolicySource, StateBackend, StateConfig, LOG_LEVELS,
};
