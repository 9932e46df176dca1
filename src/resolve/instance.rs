//! Component instances and the result of a resolution pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ResolveError;
use crate::event::EventLog;
use crate::policy::LabelSet;

use super::key::ComponentInstanceKey;

/// A resolved, identity-stable unit of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentInstance {
    /// Instance identity.
    pub key: ComponentInstanceKey,
    /// Dependencies using this instance, with the recursion depth at which
    /// each reached it.
    #[serde(default)]
    pub dependency_keys: BTreeMap<String, usize>,
    /// Keys of the instances this instance depends on.
    #[serde(default)]
    pub edges_out: BTreeSet<String>,
    /// Labels in effect when the instance was resolved.
    #[serde(default)]
    pub calculated_labels: LabelSet,
    /// Rendered code parameters.
    #[serde(default)]
    pub calculated_code_params: Value,
    /// Rendered discovery values.
    #[serde(default)]
    pub calculated_discovery: Value,
    /// True if the instance is backed by code.
    #[serde(default)]
    pub is_code: bool,
    /// Code type, for code instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_type: Option<String>,
    /// When the instance first appeared.
    pub created_at: DateTime<Utc>,
    /// When the instance data last changed.
    pub updated_at: DateTime<Utc>,
}

/// Instances indexed by key string.
pub type ComponentInstanceMap = BTreeMap<String, ComponentInstance>;

/// Why a dependency was rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    /// A rule rejected the dependency.
    Dependency,
    /// A rule rejected ingress.
    Ingress,
}

/// Classification of a failed dependency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The requested contract does not exist.
    ContractNotFound,
    /// No context matched.
    NoMatchingContext,
    /// A policy object was missing or inconsistent.
    PolicyError,
    /// A criteria expression or template failed.
    EvaluationError,
    /// Resolution re-entered a frame on the active path.
    ResolutionCycle,
    /// Resolution disagreed with data produced by another dependency.
    ConflictingInstance,
    /// Resolution panicked.
    Internal,
}

/// Terminal outcome of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DependencyOutcome {
    /// Resolved to a root service instance.
    Resolved {
        /// Key of the root service instance.
        root: String,
    },
    /// Rejected by a rule.
    Rejected {
        /// What was rejected.
        reason: RejectReason,
        /// Rule that rejected it.
        rule: String,
    },
    /// Failed to resolve.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Failure description.
        message: String,
    },
}

/// Result of a resolution pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyResolution {
    /// All resolved instances.
    #[serde(default)]
    pub component_instances: ComponentInstanceMap,
    /// Outcome per dependency key.
    #[serde(default)]
    pub dependency_outcomes: BTreeMap<String, DependencyOutcome>,
    /// Decisions taken during the pass.
    #[serde(skip)]
    pub events: EventLog,
}

impl ComponentInstance {
    /// Creates an empty instance.
    #[must_use]
    pub fn new(key: ComponentInstanceKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            dependency_keys: BTreeMap::new(),
            edges_out: BTreeSet::new(),
            calculated_labels: LabelSet::new(),
            calculated_code_params: Value::Null,
            calculated_discovery: Value::Null,
            is_code: false,
            code_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a dependency, keeping the smallest depth.
    pub fn add_dependency(&mut self, dependency: &str, depth: usize) {
        self.dependency_keys
            .entry(dependency.to_string())
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    }

    /// Records an outgoing edge.
    pub fn add_edge(&mut self, key: impl Into<String>) {
        self.edges_out.insert(key.into());
    }

    /// Overlays labels.
    pub fn add_labels(&mut self, labels: &LabelSet) {
        self.calculated_labels = self.calculated_labels.add_labels(labels.as_map());
    }

    /// Sets rendered code data.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ConflictingInstance`] if different code data
    /// was already recorded.
    pub fn set_code(
        &mut self,
        code_type: &str,
        params: Value,
        discovery: Value,
    ) -> Result<(), ResolveError> {
        if self.is_code {
            self.check_same_code(&params, &discovery)?;
        }
        self.is_code = true;
        self.code_type = Some(code_type.to_string());
        self.calculated_code_params = params;
        self.calculated_discovery = discovery;
        Ok(())
    }

    /// Merges another view of the same instance into this one.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ConflictingInstance`] if both carry different
    /// code data.
    pub fn merge(&mut self, other: &Self) -> Result<(), ResolveError> {
        if self.is_code && other.is_code {
            self.check_same_code(&other.calculated_code_params, &other.calculated_discovery)?;
        } else if other.is_code {
            self.is_code = true;
            self.code_type.clone_from(&other.code_type);
            self.calculated_code_params = other.calculated_code_params.clone();
            self.calculated_discovery = other.calculated_discovery.clone();
        }
        for (dependency, depth) in &other.dependency_keys {
            self.add_dependency(dependency, *depth);
        }
        self.edges_out.extend(other.edges_out.iter().cloned());
        self.add_labels(&other.calculated_labels);
        Ok(())
    }

    /// Returns true if the two instances carry the same resolved data.
    ///
    /// Compares labels, code parameters, discovery and edges; dependency
    /// keys and timestamps are not data.
    #[must_use]
    pub fn same_data(&self, other: &Self) -> bool {
        self.calculated_labels == other.calculated_labels
            && self.calculated_code_params == other.calculated_code_params
            && self.calculated_discovery == other.calculated_discovery
            && self.edges_out == other.edges_out
            && self.is_code == other.is_code
            && self.code_type == other.code_type
    }

    fn check_same_code(&self, params: &Value, discovery: &Value) -> Result<(), ResolveError> {
        if &self.calculated_code_params != params {
            return Err(ResolveError::ConflictingInstance {
                key: self.key.key(),
                message: format!(
                    "code params differ: {} vs {}",
                    self.calculated_code_params, params
                ),
            });
        }
        if &self.calculated_discovery != discovery {
            return Err(ResolveError::ConflictingInstance {
                key: self.key.key(),
                message: format!(
                    "discovery differs: {} vs {}",
                    self.calculated_discovery, discovery
                ),
            });
        }
        Ok(())
    }
}

impl PolicyResolution {
    /// Creates an empty resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an instance by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ComponentInstance> {
        self.component_instances.get(key)
    }

    /// Returns the outcome of a dependency.
    #[must_use]
    pub fn outcome(&self, dependency: &str) -> Option<&DependencyOutcome> {
        self.dependency_outcomes.get(dependency)
    }

    /// Returns true if the dependency resolved.
    #[must_use]
    pub fn is_resolved(&self, dependency: &str) -> bool {
        matches!(self.outcome(dependency), Some(DependencyOutcome::Resolved { .. }))
    }

    /// Returns the instances used by a dependency, in key order.
    #[must_use]
    pub fn dependency_instances(&self, dependency: &str) -> Vec<&ComponentInstance> {
        self.component_instances
            .values()
            .filter(|i| i.dependency_keys.contains_key(dependency))
            .collect()
    }

    /// Merges the instances of one dependency, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ConflictingInstance`] without modifying the
    /// resolution if any instance conflicts with one already merged.
    pub fn merge_instances(&mut self, instances: ComponentInstanceMap) -> Result<(), ResolveError> {
        for (key, instance) in &instances {
            if let Some(existing) = self.component_instances.get(key) {
                existing.clone().merge(instance)?;
            }
        }

        for (key, instance) in instances {
            match self.component_instances.get_mut(&key) {
                Some(existing) => existing.merge(&instance)?,
                None => {
                    self.component_instances.insert(key, instance);
                }
            }
        }
        Ok(())
    }

    /// Records the outcome of a dependency.
    pub fn record_outcome(&mut self, dependency: impl Into<String>, outcome: DependencyOutcome) {
        self.dependency_outcomes.insert(dependency.into(), outcome);
    }

    /// Returns every `(from, to)` edge whose target is missing.
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<(String, String)> {
        self.component_instances
            .iter()
            .flat_map(|(key, instance)| {
                instance
                    .edges_out
                    .iter()
                    .filter(|to| !self.component_instances.contains_key(*to))
                    .map(move |to| (key.clone(), to.clone()))
            })
            .collect()
    }

    /// Copies timestamps of instances that already exist in `actual`.
    pub fn carry_timestamps(&mut self, actual: &Self) {
        for (key, instance) in &mut self.component_instances {
            if let Some(previous) = actual.component_instances.get(key) {
                instance.created_at = previous.created_at;
                instance.updated_at = previous.updated_at;
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ContractNotFound => "contract not found",
            Self::NoMatchingContext => "no matching context",
            Self::PolicyError => "policy error",
            Self::EvaluationError => "evaluation error",
            Self::ResolutionCycle => "resolution cycle",
            Self::ConflictingInstance => "conflicting instance",
            Self::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for DependencyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved { root } => write!(f, "resolved ({root})"),
            Self::Rejected { reason, rule } => {
                let what = match reason {
                    RejectReason::Dependency => "dependency",
                    RejectReason::Ingress => "ingress",
                };
                write!(f, "rejected: {what} rejected by rule '{rule}'")
            }
            Self::Failed { kind, message } => write!(f, "failed ({kind}): {message}"),
        }
    }
}
