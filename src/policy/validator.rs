//! Referential validation of a loaded policy.
//!
//! Syntax is handled by deserialization; this validator checks that the
//! objects reference each other consistently and flags authoring
//! footguns as warnings.

use std::collections::HashSet;
use tracing::debug;

use crate::error::PolicyError;

use super::objects::{Contract, Service, RESERVED_COMPONENT_NAME};
use super::store::{parse_reference, Policy};

/// Validator for policies.
#[derive(Debug, Default)]
pub struct PolicyValidator;

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path of the element that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl PolicyValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a policy, collecting every problem.
    #[must_use]
    pub fn check(&self, policy: &Policy) -> ValidationResult {
        let mut result = ValidationResult::default();

        for contract in policy.all::<Contract>() {
            Self::validate_contract(policy, contract, &mut result);
        }
        for service in policy.all::<Service>() {
            Self::validate_service(policy, service, &mut result);
        }
        for dependency in policy.dependencies() {
            let field = format!("dependency {}/{}", dependency.metadata.namespace, dependency.metadata.name);
            match parse_reference(&dependency.contract, &dependency.metadata.namespace) {
                Ok((ns, name)) => {
                    if policy.get::<Contract>(name, ns).is_err() {
                        result.push(&field, format!("contract '{}' does not exist", dependency.contract));
                    }
                }
                Err(e) => result.push(&field, e.to_string()),
            }
        }

        debug!(
            "Policy validation finished: {} errors, {} warnings",
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Validates a policy, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, policy: &Policy) -> Result<ValidationResult, PolicyError> {
        let result = self.check(policy);
        match result.errors.first() {
            Some(first) => Err(PolicyError::validation(&first.field, &first.message)),
            None => Ok(result),
        }
    }

    fn validate_contract(policy: &Policy, contract: &Contract, result: &mut ValidationResult) {
        let ns = &contract.metadata.namespace;
        let prefix = format!("contract {ns}/{}", contract.metadata.name);

        if contract.contexts.is_empty() {
            result.push(&prefix, String::from("contract has no contexts"));
        }

        let mut seen = HashSet::new();
        let last = contract.contexts.len().saturating_sub(1);
        for (idx, context) in contract.contexts.iter().enumerate() {
            let field = format!("{prefix}.contexts.{}", context.name);
            if !seen.insert(context.name.as_str()) {
                result.push(&field, String::from("duplicate context name"));
            }
            if policy.get::<Service>(&context.allocation.service, ns).is_err() {
                result.push(
                    &field,
                    format!("allocation service '{}' does not exist", context.allocation.service),
                );
            }

            let matches_everything = context.criteria.as_ref().is_none_or(|c| c.is_empty());
            if matches_everything && idx < last {
                result.warnings.push(format!(
                    "{field}: context has no criteria and shadows the {} context(s) declared after it",
                    last - idx
                ));
            }
        }
    }

    fn validate_service(policy: &Policy, service: &Service, result: &mut ValidationResult) {
        let ns = &service.metadata.namespace;
        let prefix = format!("service {ns}/{}", service.metadata.name);
        let names: HashSet<&str> = service.components.iter().map(|c| c.name.as_str()).collect();

        if names.len() != service.components.len() {
            result.push(&prefix, String::from("duplicate component names"));
        }

        for component in &service.components {
            let field = format!("{prefix}.components.{}", component.name);

            if component.name == RESERVED_COMPONENT_NAME {
                result.push(&field, format!("component name '{RESERVED_COMPONENT_NAME}' is reserved"));
            }

            match (&component.contract, &component.code) {
                (Some(_), Some(_)) => {
                    result.push(&field, String::from("component has both contract and code"));
                }
                (None, None) => {
                    result.push(&field, String::from("component has neither contract nor code"));
                }
                (Some(reference), None) => match parse_reference(reference, ns) {
                    Ok((ref_ns, name)) => {
                        if policy.get::<Contract>(name, ref_ns).is_err() {
                            result.push(&field, format!("contract '{reference}' does not exist"));
                        }
                    }
                    Err(e) => result.push(&field, e.to_string()),
                },
                (None, Some(_)) => {}
            }

            for dep in &component.dependencies {
                if !names.contains(dep.as_str()) {
                    result.push(&field, format!("depends on unknown component '{dep}'"));
                }
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, field: &str, message: String) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::objects::{
        Allocation, Code, Component, Context, Criteria, Metadata, PolicyObject,
    };

    fn code_component(name: &str) -> Component {
        Component {
            name: name.to_string(),
            criteria: None,
            contract: None,
            code: Some(Code {
                code_type: String::from("raw"),
                params: serde_json::Value::Null,
            }),
            discovery: serde_json::Value::Null,
            dependencies: vec![],
        }
    }

    fn context(name: &str, criteria: Option<Criteria>) -> Context {
        Context {
            name: name.to_string(),
            criteria,
            change_labels: None,
            allocation: Allocation {
                service: String::from("web"),
                keys: vec![],
            },
        }
    }

    fn policy(contexts: Vec<Context>, components: Vec<Component>) -> Policy {
        Policy::from_objects([
            PolicyObject::Service(Service {
                metadata: Metadata::new("main", "web"),
                labels: std::collections::BTreeMap::new(),
                components,
            }),
            PolicyObject::Contract(Contract {
                metadata: Metadata::new("main", "web"),
                contexts,
            }),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_policy() {
        let p = policy(vec![context("default", None)], vec![code_component("app")]);
        let result = PolicyValidator::new().validate(&p).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_shadowing_context_is_warned() {
        let gated = Criteria {
            require_all: vec![String::from("(eq env \"prod\")")],
            ..Criteria::default()
        };
        let p = policy(
            vec![context("catch-all", None), context("prod", Some(gated))],
            vec![code_component("app")],
        );
        let result = PolicyValidator::new().check(&p);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("shadows"));
    }

    #[test]
    fn test_reserved_and_unknown_dependency() {
        let mut app = code_component("root");
        app.dependencies.push(String::from("missing"));
        let p = policy(vec![context("default", None)], vec![app]);

        let result = PolicyValidator::new().check(&p);
        assert_eq!(result.errors.len(), 2);
        assert!(PolicyValidator::new().validate(&p).is_err());
    }
}
