//! Action application.
//!
//! This module provides:
//! - Typed actions and their application against actual state
//! - Panic-to-error guards around every unit of work
//! - Per-action metrics
//! - The wave executor for apply plans

mod action;
mod context;
mod executor;
pub mod guard;
mod metrics;

pub use action::{Action, ActionKind, Phase};
pub use context::ApplyContext;
pub use executor::{
    ActionResult, ActionStatus, ExecutionResult, PlanExecutor, DEFAULT_MAX_PARALLEL_ACTIONS,
};
pub use metrics::{
    ActionSample, InMemoryMetrics, MetricsCollector, RecorderMetrics, ACTIONS_TOTAL_METRIC,
    ACTION_DURATION_METRIC,
};
