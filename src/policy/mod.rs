//! Policy model.
//!
//! This module provides:
//! - Policy object types (services, contracts, rules, clusters, dependencies)
//! - Label sets and label transforms
//! - A kind-parameterized, read-only policy snapshot
//! - Referential validation

mod labels;
mod objects;
mod store;
mod validator;

pub use labels::{LabelOperations, LabelSet, LABEL_CLUSTER, LABEL_TARGET};
pub use objects::{
    Allocation, Cluster, Code, Component, Context, Contract, Criteria, Dependency, Metadata,
    ObjectKind, PolicyObject, Rule, RuleActions, RuleVerdict, Service, User, DEFAULT_NAMESPACE,
    RESERVED_COMPONENT_NAME,
};
pub use store::{parse_reference, Policy, PolicyKind};
pub use validator::{PolicyValidator, ValidationError, ValidationResult};
