//! Engine configuration types.
//!
//! These structs map to `orchestrator.yaml`. Every field has a default, so
//! an empty file (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::apply::DEFAULT_MAX_PARALLEL_ACTIONS;
use crate::error::ConfigError;

/// Log levels accepted by `logging.level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Where policy documents are read from.
    pub policy: PolicySource,
    /// Where actual state is stored.
    pub state: StateConfig,
    /// How plans are applied.
    pub apply: ApplyConfig,
    /// Process logging.
    pub logging: LoggingConfig,
}

/// Policy document locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicySource {
    /// Policy file, or directory of `*.yaml` files.
    pub path: PathBuf,
    /// Optional users file (a YAML list of users).
    pub users: Option<PathBuf>,
    /// Optional secrets file (a YAML map of user name to secrets).
    pub secrets: Option<PathBuf>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON file on local disk.
    #[default]
    Local,
    /// Process memory; nothing survives the process.
    Memory,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    /// Backend type.
    pub backend: StateBackend,
    /// State file path, for the local backend.
    pub path: PathBuf,
}

/// Apply behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApplyConfig {
    /// Maximum number of actions applied concurrently within a wave.
    pub max_parallel_actions: usize,
    /// Keep running later waves after a wave with failures.
    pub continue_on_error: bool,
}

/// Process logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter.
    pub level: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for PolicySource {
    fn default() -> Self {
        Self {
            path: PathBuf::from("policy"),
            users: None,
            secrets: None,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Local,
            path: PathBuf::from(".orchestrator/state.json"),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_parallel_actions: DEFAULT_MAX_PARALLEL_ACTIONS,
            continue_on_error: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.apply.max_parallel_actions == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("apply.max_parallel_actions"),
                message: String::from("must be at least 1"),
            });
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: String::from("logging.level"),
                message: format!(
                    "unknown level '{}', expected one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.policy.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: String::from("policy.path"),
                message: String::from("must not be empty"),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for StateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Memory => "memory",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.apply.continue_on_error);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r"
apply:
  max_parallel_actions: 2
logging:
  json: true
";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.apply.max_parallel_actions, 2);
        assert!(config.apply.continue_on_error);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::default();
        config.apply.max_parallel_actions = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.logging.level = String::from("loud");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }
}
