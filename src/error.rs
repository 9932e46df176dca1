//! Error types for the policy orchestrator.
//!
//! This module provides the error hierarchy for every stage of a pass:
//! policy lookup, expression evaluation, resolution, state management,
//! action application, plugin invocation and configuration.

use std::path::PathBuf;
use thiserror::Error;

use crate::resolve::FailureKind;

/// The main error type for the policy orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Policy lookup or reference errors.
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Criteria or template evaluation errors.
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Dependency resolution errors.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Actual-state management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Action application errors.
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Code plugin errors.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Engine configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A task panicked and the panic was recovered.
    #[error("panic: {message}\n{backtrace}")]
    Panic {
        /// Panic payload rendered as text.
        message: String,
        /// Stack trace captured at the panic site.
        backtrace: String,
    },

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while looking up policy objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The requested object does not exist.
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        /// Object kind.
        kind: String,
        /// Object namespace.
        namespace: String,
        /// Object name.
        name: String,
    },

    /// The object exists but has a different kind than requested.
    #[error("object '{namespace}/{name}' is a {actual}, expected {expected}")]
    KindMismatch {
        /// Requested kind.
        expected: String,
        /// Kind actually stored.
        actual: String,
        /// Object namespace.
        namespace: String,
        /// Object name.
        name: String,
    },

    /// A reference string could not be interpreted.
    #[error("malformed reference '{reference}': {reason}")]
    MalformedReference {
        /// The offending reference.
        reference: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two objects share the same kind, namespace and name.
    #[error("duplicate {kind} '{namespace}/{name}'")]
    Duplicate {
        /// Object kind.
        kind: String,
        /// Object namespace.
        namespace: String,
        /// Object name.
        name: String,
    },

    /// Components of a service depend on each other in a loop.
    #[error("component dependency cycle in service '{service}': {cycle}")]
    ComponentCycle {
        /// Service owning the components.
        service: String,
        /// Description of the cycle.
        cycle: String,
    },

    /// A policy document could not be parsed.
    #[error("failed to parse policy: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The policy failed semantic validation.
    #[error("policy validation failed at {field}: {message}")]
    ValidationError {
        /// Path of the invalid element.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Errors raised while evaluating criteria and templates.
///
/// Every variant carries the literal text that failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    /// A criteria expression failed to evaluate.
    #[error("unable to evaluate expression '{expression}': {message}")]
    Expression {
        /// Expression text.
        expression: String,
        /// Underlying failure.
        message: String,
    },

    /// A criteria expression evaluated to something other than a boolean.
    #[error("expression '{expression}' did not evaluate to a boolean (got '{value}')")]
    NotBoolean {
        /// Expression text.
        expression: String,
        /// Rendered value.
        value: String,
    },

    /// A template failed to render.
    #[error("unable to evaluate template '{template}': {message}")]
    Template {
        /// Template text.
        template: String,
        /// Underlying failure.
        message: String,
    },
}

/// Errors that end the resolution of one dependency.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested contract does not exist.
    #[error("contract '{contract}' not found")]
    ContractNotFound {
        /// Contract reference as requested.
        contract: String,
    },

    /// No context of the contract matched the current labels.
    #[error("no matching context found in contract '{contract}'")]
    NoMatchingContext {
        /// Contract name.
        contract: String,
    },

    /// The same service/context/allocation was re-entered on the active path.
    #[error("resolution cycle detected: {path}")]
    ResolutionCycle {
        /// The active path, ending with the re-entered frame.
        path: String,
    },

    /// Nested contracts went deeper than the resolver follows.
    #[error("resolution exceeded the maximum depth of {limit}: {path}")]
    DepthLimitExceeded {
        /// The depth limit.
        limit: usize,
        /// The active path, ending with the frame that did not fit.
        path: String,
    },

    /// Two resolution paths produced different data for one instance.
    #[error("conflicting data for component instance '{key}': {message}")]
    ConflictingInstance {
        /// Component instance key.
        key: String,
        /// What differs.
        message: String,
    },

    /// A code component needs a cluster but none was selected.
    #[error("cluster label is not set for code component '{component}' of service '{service}'")]
    ClusterNotSet {
        /// Service name.
        service: String,
        /// Component name.
        component: String,
    },

    /// Policy lookup failed during resolution.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Criteria or template evaluation failed during resolution.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Actual-state management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The component instance does not exist in actual state.
    #[error("component instance not found in actual state: {key}")]
    InstanceNotFound {
        /// Component instance key.
        key: String,
    },

    /// State document is corrupted.
    #[error("state is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("state is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("state serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("state version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Action application errors.
#[derive(Debug, Error)]
pub enum ActionError {
    /// An action failed.
    #[error("action '{action}' failed: {reason}")]
    Failed {
        /// Action description.
        action: String,
        /// Reason for failure.
        reason: String,
    },

    /// An action was not attempted because a prerequisite failed.
    #[error("action '{action}' skipped: prerequisite '{prerequisite}' did not complete")]
    Skipped {
        /// Action description.
        action: String,
        /// Key whose action failed or was skipped.
        prerequisite: String,
    },

    /// Apply was aborted before completion.
    #[error("apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Code plugin errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin is registered for the cluster type and code type.
    #[error("no plugin registered for code type '{code_type}' on cluster '{cluster}' ({cluster_type})")]
    NotRegistered {
        /// Cluster name.
        cluster: String,
        /// Cluster type.
        cluster_type: String,
        /// Code type.
        code_type: String,
    },

    /// A plugin call failed.
    #[error("plugin call '{operation}' failed for '{deploy_name}': {message}")]
    CallFailed {
        /// Operation name.
        operation: String,
        /// Deploy name of the instance.
        deploy_name: String,
        /// Description of the failure.
        message: String,
    },
}

/// Engine configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if re-running the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
                | Self::Plugin(PluginError::CallFailed { .. })
                | Self::Panic { .. }
        )
    }

    /// Returns true if this error is a recovered panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panic { .. })
    }
}

impl EvalError {
    /// Creates an expression evaluation error.
    #[must_use]
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Creates a template evaluation error.
    #[must_use]
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Returns the expression or template text that failed.
    #[must_use]
    pub fn source_text(&self) -> &str {
        match self {
            Self::Expression { expression, .. } | Self::NotBoolean { expression, .. } => {
                expression
            }
            Self::Template { template, .. } => template,
        }
    }
}

impl ResolveError {
    /// Classifies this error for the recorded dependency outcome.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ContractNotFound { .. } => FailureKind::ContractNotFound,
            Self::NoMatchingContext { .. } => FailureKind::NoMatchingContext,
            Self::ResolutionCycle { .. } => FailureKind::ResolutionCycle,
            Self::ConflictingInstance { .. } => FailureKind::ConflictingInstance,
            Self::ClusterNotSet { .. } | Self::DepthLimitExceeded { .. } | Self::Policy(_) => {
                FailureKind::PolicyError
            }
            Self::Eval(_) => FailureKind::EvaluationError,
        }
    }
}

impl PolicyError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a validation error for a specific element.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl PluginError {
    /// Creates a plugin call failure.
    #[must_use]
    pub fn call_failed(
        operation: impl Into<String>,
        deploy_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CallFailed {
            operation: operation.into(),
            deploy_name: deploy_name.into(),
            message: message.into(),
        }
    }
}
