// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::cognitive_complexity)]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Policy Orchestrator
//!
//! A policy-driven service-orchestration engine.
//!
//! ## Overview
//!
//! Users declare *dependencies* ("user X needs contract Y with labels Z").
//! A policy of services, contracts, contexts and rules describes how such
//! requests become concrete component instances across clusters. The
//! engine:
//!
//! - Resolves every dependency into a graph of component instances
//! - Diffs the desired graph against the recorded actual state
//! - Applies the resulting actions in dependency order, concurrently
//!   within a wave, isolating failures and panics per action
//! - Persists the new actual state with a bounded revision history
//!
//! ## Modules
//!
//! - [`policy`]: Policy objects, labels, lookup and validation
//! - [`lang`]: Criteria expressions and templates
//! - [`resolve`]: The recursive resolver and instance model
//! - [`planner`]: State diff and wave-ordered apply plans
//! - [`apply`]: Actions, the plan executor and metrics
//! - [`state`]: Actual-state storage, locking and the shared updater
//! - [`plugin`]: Code plugin interface and resource collection
//! - [`reconciler`]: The end-to-end resolve, diff, apply pass
//! - [`config`]: Engine configuration and policy loading
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! - kind: cluster
//!   name: k8s
//!   type: kubernetes
//!
//! - kind: service
//!   name: postgres
//!   components:
//!     - name: db
//!       code:
//!         type: helm
//!         params:
//!           chart: postgresql
//!           name: "db-{{User.Name}}"
//!
//! - kind: contract
//!   name: sql-db
//!   contexts:
//!     - name: default
//!       allocation:
//!         service: postgres
//!         keys: ["{{User.Name}}"]
//!
//! - kind: dependency
//!   name: alice-db
//!   user: alice
//!   contract: sql-db
//!   labels:
//!     cluster: k8s
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod apply;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod external;
pub mod lang;
pub mod planner;
pub mod plugin;
pub mod policy;
pub mod reconciler;
pub mod resolve;
pub mod state;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

pub use apply::{Action, ActionKind, ApplyContext, ExecutionResult, PlanExecutor};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigLoader, EngineConfig, KeyHasher, PolicyLoader};
pub use error::{OrchestratorError, Result};
pub use event::{EventLevel, EventLog};
pub use external::{ExternalData, SecretLoader, UserLoader};
pub use planner::{ApplyPlan, DiffEngine, StateDiff};
pub use plugin::{CodePlugin, PluginRegistry, ResourceCollector, StaticPluginRegistry};
pub use policy::{Policy, PolicyObject, PolicyValidator};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution, Resolver};
pub use state::{LocalStateStore, MemoryStateStore, SharedActualState, StateStore, StoredState};
