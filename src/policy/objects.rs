//! Policy object types.
//!
//! These types map one-to-one to the YAML policy documents. Every object
//! carries [`Metadata`] (namespace, name, generation) and is immutable for
//! the duration of a resolution pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::labels::LabelOperations;

/// Namespace used when a document does not declare one.
pub const DEFAULT_NAMESPACE: &str = "main";

/// Component name reserved for service-level instances.
pub const RESERVED_COMPONENT_NAME: &str = "root";

/// Identity shared by all policy objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Metadata {
    /// Namespace the object lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Object name, unique per kind within the namespace.
    pub name: String,
    /// Object generation, bumped by the owning store on every change.
    #[serde(default)]
    pub generation: u64,
}

/// Kinds of objects stored in a [`super::Policy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A deployable service.
    Service,
    /// A contract routing requests to services.
    Contract,
    /// A rule applied during resolution.
    Rule,
    /// A target cluster.
    Cluster,
    /// A user's request for a contract.
    Dependency,
}

/// A policy object of any kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyObject {
    /// Service object.
    Service(Service),
    /// Contract object.
    Contract(Contract),
    /// Rule object.
    Rule(Rule),
    /// Cluster object.
    Cluster(Cluster),
    /// Dependency object.
    Dependency(Dependency),
}

/// A service: a named set of components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    /// Object identity.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Labels merged into the working label set when the service is selected.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Components of the service.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// A service component: either a contract reference or a code unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    /// Component name, unique within the service.
    pub name: String,
    /// Per-component gating criteria (labels only).
    #[serde(default)]
    pub criteria: Option<Criteria>,
    /// Contract this component needs (indirection).
    #[serde(default)]
    pub contract: Option<String>,
    /// Code unit deployed for this component (leaf).
    #[serde(default)]
    pub code: Option<Code>,
    /// Discovery templates published by this component.
    #[serde(default)]
    pub discovery: serde_json::Value,
    /// Sibling components this component depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A deployable code unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Code {
    /// Code type, used to pick a plugin (e.g. `helm`, `raw`).
    #[serde(rename = "type")]
    pub code_type: String,
    /// Code parameter templates.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A contract: an ordered list of contexts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    /// Object identity.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Contexts in priority order; the first match wins.
    #[serde(default)]
    pub contexts: Vec<Context>,
}

/// A criteria-gated routing rule inside a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// Context name, unique within the contract.
    pub name: String,
    /// Selection criteria (labels only).
    #[serde(default)]
    pub criteria: Option<Criteria>,
    /// Label changes applied once the context is selected.
    #[serde(default)]
    pub change_labels: Option<LabelOperations>,
    /// Service allocation for the context.
    pub allocation: Allocation,
}

/// Target service of a context plus optional allocation key templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    /// Service name in the contract's namespace.
    pub service: String,
    /// Templates producing the allocation keys.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Boolean criteria built from expressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Criteria {
    /// All of these must be true.
    #[serde(default)]
    pub require_all: Vec<String>,
    /// At least one of these must be true (when non-empty).
    #[serde(default)]
    pub require_any: Vec<String>,
    /// None of these may be true.
    #[serde(default)]
    pub require_none: Vec<String>,
}

/// A rule: criteria plus actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Object identity.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Criteria evaluated against labels, service and dependency.
    #[serde(default)]
    pub criteria: Option<Criteria>,
    /// Actions performed when the criteria match.
    #[serde(default)]
    pub actions: RuleActions,
}

/// Actions carried by a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleActions {
    /// Allow or reject the dependency.
    #[serde(default)]
    pub dependency: Option<RuleVerdict>,
    /// Allow or reject ingress traffic.
    #[serde(default)]
    pub ingress: Option<RuleVerdict>,
    /// Label changes.
    #[serde(default)]
    pub change_labels: Option<LabelOperations>,
}

/// Verdict of a rule action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleVerdict {
    /// Let the request through.
    Allow,
    /// Reject the request.
    Reject,
}

/// A cluster code can be deployed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    /// Object identity.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Cluster type, used to pick a plugin (e.g. `kubernetes`).
    #[serde(rename = "type")]
    pub cluster_type: String,
    /// Plugin-specific configuration.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// A user's request for an instance of a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// Object identity.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Name of the requesting user.
    pub user: String,
    /// Contract reference (`name` or `namespace/name`).
    pub contract: String,
    /// Labels supplied by the user.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A user as provided by the user loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// User name.
    pub name: String,
    /// User labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    String::from(DEFAULT_NAMESPACE)
}

impl Metadata {
    /// Creates metadata for a namespaced object.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation: 0,
        }
    }
}

impl PolicyObject {
    /// Returns the metadata of the object.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        match self {
            Self::Service(o) => &o.metadata,
            Self::Contract(o) => &o.metadata,
            Self::Rule(o) => &o.metadata,
            Self::Cluster(o) => &o.metadata,
            Self::Dependency(o) => &o.metadata,
        }
    }

    /// Returns the kind of the object.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Service(_) => ObjectKind::Service,
            Self::Contract(_) => ObjectKind::Contract,
            Self::Rule(_) => ObjectKind::Rule,
            Self::Cluster(_) => ObjectKind::Cluster,
            Self::Dependency(_) => ObjectKind::Dependency,
        }
    }
}

impl Service {
    /// Looks up a component by name.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

impl Contract {
    /// Looks up a context by name.
    #[must_use]
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }
}

impl Criteria {
    /// Returns true if the criteria contain no expressions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.require_all.is_empty() && self.require_any.is_empty() && self.require_none.is_empty()
    }
}

impl RuleActions {
    /// Returns true if the dependency is rejected.
    #[must_use]
    pub fn rejects_dependency(&self) -> bool {
        self.dependency == Some(RuleVerdict::Reject)
    }

    /// Returns true if ingress is rejected.
    #[must_use]
    pub fn rejects_ingress(&self) -> bool {
        self.ingress == Some(RuleVerdict::Reject)
    }
}

impl Dependency {
    /// Returns the deterministic identity of this dependency.
    ///
    /// The key is derived from the storable identity (namespace, kind, name)
    /// and is stable across passes and process restarts.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.metadata.namespace,
            ObjectKind::Dependency,
            self.metadata.name
        )
    }
}

impl ObjectKind {
    /// All kinds, in a fixed order.
    pub const ALL: [Self; 5] = [
        Self::Service,
        Self::Contract,
        Self::Rule,
        Self::Cluster,
        Self::Dependency,
    ];

    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Contract => "contract",
            Self::Rule => "rule",
            Self::Cluster => "cluster",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_objects() {
        let yaml = r#"
- kind: contract
  name: db
  contexts:
    - name: prod
      criteria:
        require_all: ['(eq env "prod")']
      allocation:
        service: postgres
        keys: ["{{User.Name}}"]
- kind: dependency
  namespace: team
  name: alice-db
  user: alice
  contract: main/db
  labels:
    env: prod
"#;
        let objects: Vec<PolicyObject> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind(), ObjectKind::Contract);
        assert_eq!(objects[0].metadata().namespace, DEFAULT_NAMESPACE);

        let PolicyObject::Dependency(dependency) = &objects[1] else {
            panic!("expected dependency");
        };
        assert_eq!(dependency.key(), "team:dependency:alice-db");
        assert_eq!(dependency.labels.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_rule_actions() {
        let yaml = r#"
kind: rule
name: no-untrusted
criteria:
  require_all: ['(eq tier "untrusted")']
actions:
  dependency: reject
"#;
        let object: PolicyObject = serde_yaml::from_str(yaml).unwrap();
        let PolicyObject::Rule(rule) = object else {
            panic!("expected rule");
        };
        assert!(rule.actions.rejects_dependency());
        assert!(!rule.actions.rejects_ingress());
    }
}
