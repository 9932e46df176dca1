//! Loading of the engine configuration and of policy documents.
//!
//! Configuration comes from a YAML file, then `ORCH_*` environment
//! variables override individual fields. Policy documents are YAML
//! sequences of tagged objects, read from one file or from every `*.yaml`
//! file of a directory in name order.

use serde::Deserialize as _;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::EngineConfig;
use crate::error::{ConfigError, PolicyError, Result};
use crate::policy::{Policy, PolicyObject, User};

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["orchestrator.yaml", "orchestrator.yml"];

/// Loader for the engine configuration.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
}

/// Loader for policy, user and secret documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyLoader;

impl ConfigLoader {
    /// Creates a new configuration loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        // An empty document is a valid, all-defaults configuration.
        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        let config: EngineConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })?;
        Ok(config)
    }

    /// Loads configuration, applies environment overrides and validates it.
    ///
    /// Without a path, the defaults are used as the base.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is invalid after overrides.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<EngineConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => EngineConfig::default(),
        };
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ORCH_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a numeric override does not
    /// parse.
    pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ORCH_POLICY_PATH") {
            debug!("Overriding policy.path from environment");
            config.policy.path = PathBuf::from(path);
        }

        if let Some(path) = lookup("ORCH_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = PathBuf::from(path);
        }

        if let Some(value) = lookup("ORCH_MAX_PARALLEL_ACTIONS") {
            debug!("Overriding apply.max_parallel_actions from environment");
            config.apply.max_parallel_actions =
                value.parse().map_err(|e| ConfigError::InvalidValue {
                    field: String::from("ORCH_MAX_PARALLEL_ACTIONS"),
                    message: format!("'{value}' is not a number: {e}"),
                })?;
        }

        if let Some(level) = lookup("ORCH_LOG_LEVEL") {
            debug!("Overriding logging.level from environment");
            config.logging.level = level;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds the configuration file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

impl PolicyLoader {
    /// Creates a policy loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads a policy from a file or a directory of YAML files.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, or if two
    /// objects share kind, namespace and name.
    pub fn load_policy(&self, path: &Path) -> Result<Policy> {
        let mut objects = Vec::new();
        for file in Self::policy_files(path)? {
            let content = read(&file)?;
            objects.extend(self.parse_objects(&content, &file)?);
        }
        let policy = Policy::from_objects(objects)?;
        info!("Loaded {} policy objects from {}", policy.len(), path.display());
        Ok(policy)
    }

    /// Parses every YAML document of `content` as a sequence of objects.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::ParseError`] naming `source`.
    pub fn parse_objects(&self, content: &str, source: &Path) -> Result<Vec<PolicyObject>> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document).map_err(|e| parse_error(&e, source))?;
            if value.is_null() {
                continue;
            }
            let batch: Vec<PolicyObject> =
                serde_yaml::from_value(value).map_err(|e| parse_error(&e, source))?;
            objects.extend(batch);
        }
        debug!("Parsed {} objects from {}", objects.len(), source.display());
        Ok(objects)
    }

    /// Loads users from a YAML list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_users(&self, path: &Path) -> Result<Vec<User>> {
        let content = read(path)?;
        let users: Vec<User> = serde_yaml::from_str(&content).map_err(|e| parse_error(&e, path))?;
        info!("Loaded {} users from {}", users.len(), path.display());
        Ok(users)
    }

    /// Loads secrets from a YAML map of user name to secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_secrets(&self, path: &Path) -> Result<HashMap<String, BTreeMap<String, String>>> {
        let content = read(path)?;
        let secrets = serde_yaml::from_str(&content).map_err(|e| parse_error(&e, path))?;
        Ok(secrets)
    }

    fn policy_files(path: &Path) -> Result<Vec<PathBuf>> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

fn read(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(std::fs::read_to_string(path)?)
}

fn parse_error(error: &serde_yaml::Error, source: &Path) -> PolicyError {
    PolicyError::ParseError {
        message: error.to_string(),
        location: Some(source.display().to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Cluster, Contract};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_from_lookup() {
        let mut config = EngineConfig::default();
        let env: HashMap<&str, &str> = [
            ("ORCH_POLICY_PATH", "/etc/policy"),
            ("ORCH_MAX_PARALLEL_ACTIONS", "3"),
            ("ORCH_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        ConfigLoader::apply_overrides(&mut config, |name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.policy.path, PathBuf::from("/etc/policy"));
        assert_eq!(config.apply.max_parallel_actions, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_numeric_override() {
        let mut config = EngineConfig::default();
        let result = ConfigLoader::apply_overrides(&mut config, |name| {
            (name == "ORCH_MAX_PARALLEL_ACTIONS").then(|| String::from("many"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("orchestrator.yaml"), "apply:\n  max_parallel_actions: 4\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        let config = ConfigLoader::new().load_file(found).unwrap();
        assert_eq!(config.apply.max_parallel_actions, 4);
    }

    #[test]
    fn test_empty_config_file() {
        let config = ConfigLoader::new().parse_yaml("  \n", None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_policy_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("10-clusters.yaml"),
            "- kind: cluster\n  name: east\n  type: kubernetes\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("20-contracts.yml"),
            "- kind: contract\n  name: db\n  contexts: []\n---\n- kind: contract\n  name: cache\n",
        )
        .unwrap();
        fs::write(temp.path().join("README.md"), "not policy").unwrap();

        let policy = PolicyLoader::new().load_policy(temp.path()).unwrap();
        assert_eq!(policy.len(), 3);
        assert!(policy.get::<Cluster>("east", "main").is_ok());
        assert_eq!(policy.all::<Contract>().len(), 2);
    }

    #[test]
    fn test_policy_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("bad.yaml");
        fs::write(&file, "- kind: spaceship\n  name: x\n").unwrap();

        let err = PolicyLoader::new().load_policy(&file).unwrap_err();
        assert!(err.to_string().contains("failed to parse policy"));
    }

    #[test]
    fn test_load_users_and_secrets() {
        let temp = TempDir::new().unwrap();
        let users = temp.path().join("users.yaml");
        let secrets = temp.path().join("secrets.yaml");
        fs::write(&users, "- name: alice\n  labels:\n    team: core\n").unwrap();
        fs::write(&secrets, "alice:\n  token: s3cr3t\n").unwrap();

        let loader = PolicyLoader::new();
        assert_eq!(loader.load_users(&users).unwrap()[0].labels["team"], "core");
        assert_eq!(loader.load_secrets(&secrets).unwrap()["alice"]["token"], "s3cr3t");
    }
}
