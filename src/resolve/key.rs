//! Component instance keys.
//!
//! A [`ComponentInstanceKey`] identifies one resolved component instance.
//! It is derived only from policy data (cluster, target, namespace,
//! contract, context, allocation keys, service, component), so the same
//! inputs produce the same key across passes and process restarts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::KeyHasher;
use crate::policy::RESERVED_COMPONENT_NAME;

/// Separator between key fields.
const KEY_SEPARATOR: char = '#';

/// Identity of a component instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentInstanceKey {
    /// Cluster name (empty when no cluster is selected).
    #[serde(default)]
    pub cluster: String,
    /// Target suffix inside the cluster.
    #[serde(default)]
    pub target_suffix: String,
    /// Namespace of the contract.
    pub namespace: String,
    /// Contract name.
    pub contract: String,
    /// Selected context name.
    pub context: String,
    /// Resolved allocation keys.
    #[serde(default)]
    pub allocation_keys: Vec<String>,
    /// Service name.
    pub service: String,
    /// Component name, or the reserved name for the service instance.
    pub component: String,
}

impl ComponentInstanceKey {
    /// Creates the key of a service-level instance.
    #[must_use]
    pub fn for_service(
        cluster: impl Into<String>,
        target_suffix: impl Into<String>,
        namespace: impl Into<String>,
        contract: impl Into<String>,
        context: impl Into<String>,
        allocation_keys: Vec<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            target_suffix: target_suffix.into(),
            namespace: namespace.into(),
            contract: contract.into(),
            context: context.into(),
            allocation_keys,
            service: service.into(),
            component: String::from(RESERVED_COMPONENT_NAME),
        }
    }

    /// Derives the key of a component of the same service instance.
    #[must_use]
    pub fn with_component(&self, component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..self.clone()
        }
    }

    /// Derives the key of the owning service instance.
    #[must_use]
    pub fn parent_service_key(&self) -> Self {
        self.with_component(RESERVED_COMPONENT_NAME)
    }

    /// Returns true if this is a service-level instance.
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.component == RESERVED_COMPONENT_NAME
    }

    /// Returns true if this is a component-level instance.
    #[must_use]
    pub fn is_component(&self) -> bool {
        !self.is_service()
    }

    /// Returns the context name joined with the allocation keys.
    #[must_use]
    pub fn context_with_keys(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.allocation_keys.len());
        parts.push(self.context.as_str());
        parts.extend(self.allocation_keys.iter().map(String::as_str));
        parts.join(&KEY_SEPARATOR.to_string())
    }

    /// Returns the string form used as the map key.
    #[must_use]
    pub fn key(&self) -> String {
        [
            self.cluster.as_str(),
            self.target_suffix.as_str(),
            self.namespace.as_str(),
            self.contract.as_str(),
            &self.context_with_keys(),
            self.service.as_str(),
            self.component.as_str(),
        ]
        .join(&KEY_SEPARATOR.to_string())
    }

    /// Returns the human-readable deploy name.
    #[must_use]
    pub fn deploy_name(&self) -> String {
        let mut parts = vec![self.namespace.as_str(), self.contract.as_str(), self.context.as_str()];
        parts.extend(self.allocation_keys.iter().map(String::as_str));
        parts.push(self.component.as_str());
        parts.join("-")
    }

    /// Returns the deploy name escaped to `[a-z0-9-]`.
    #[must_use]
    pub fn escaped_deploy_name(&self) -> String {
        escape_name(&self.deploy_name())
    }

    /// Returns the short hash of the key.
    #[must_use]
    pub fn instance_id(&self) -> String {
        KeyHasher::new().short_key_hash(&self.key())
    }
}

impl fmt::Display for ComponentInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Escapes a name so it is usable as a resource name.
///
/// Lowercases ASCII letters and replaces every other character outside
/// `[a-z0-9-]` with `-`.
#[must_use]
pub fn escape_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
