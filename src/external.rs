//! External data collaborators.
//!
//! Users and their secrets live outside the policy. Both are injected into
//! the resolver as trait objects; secrets are read lazily, only when a
//! template references `User.Secrets`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::policy::User;

/// Source of users referenced by dependencies.
pub trait UserLoader: Send + Sync {
    /// Loads a user by name.
    fn load_user_by_name(&self, name: &str) -> Option<User>;

    /// Loads all known users.
    fn load_users(&self) -> Vec<User>;
}

/// Source of per-user secrets.
#[cfg_attr(test, mockall::automock)]
pub trait SecretLoader: Send + Sync {
    /// Loads the secrets of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret backend cannot be read.
    fn load_secrets_by_user_name(&self, name: &str) -> Result<BTreeMap<String, String>>;
}

/// Injected external data.
#[derive(Clone)]
pub struct ExternalData {
    /// User source.
    pub users: Arc<dyn UserLoader>,
    /// Secret source.
    pub secrets: Arc<dyn SecretLoader>,
}

/// In-memory user loader.
#[derive(Debug, Clone, Default)]
pub struct StaticUserLoader {
    users: HashMap<String, User>,
}

/// In-memory secret loader.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretLoader {
    secrets: HashMap<String, BTreeMap<String, String>>,
}

impl ExternalData {
    /// Creates external data from loaders.
    #[must_use]
    pub fn new(users: Arc<dyn UserLoader>, secrets: Arc<dyn SecretLoader>) -> Self {
        Self { users, secrets }
    }

    /// Creates external data with static users and no secrets.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self::new(
            Arc::new(StaticUserLoader::new(users)),
            Arc::new(StaticSecretLoader::default()),
        )
    }
}

impl std::fmt::Debug for ExternalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalData").finish_non_exhaustive()
    }
}

impl StaticUserLoader {
    /// Creates a loader over a fixed user list.
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }
}

impl UserLoader for StaticUserLoader {
    fn load_user_by_name(&self, name: &str) -> Option<User> {
        self.users.get(name).cloned()
    }

    fn load_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }
}

impl StaticSecretLoader {
    /// Creates a loader over fixed secrets.
    #[must_use]
    pub const fn new(secrets: HashMap<String, BTreeMap<String, String>>) -> Self {
        Self { secrets }
    }
}

impl SecretLoader for StaticSecretLoader {
    fn load_secrets_by_user_name(&self, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.secrets.get(name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_users_sorted() {
        let loader = StaticUserLoader::new([
            User {
                name: String::from("bob"),
                labels: BTreeMap::new(),
            },
            User {
                name: String::from("alice"),
                labels: BTreeMap::new(),
            },
        ]);
        let names: Vec<String> = loader.load_users().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert!(loader.load_user_by_name("carol").is_none());
    }

    #[test]
    fn test_unknown_user_has_no_secrets() {
        let loader = StaticSecretLoader::default();
        assert!(loader.load_secrets_by_user_name("alice").unwrap().is_empty());
    }
}
