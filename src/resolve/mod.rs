//! Policy resolution.
//!
//! This module provides:
//! - Stable component instance keys
//! - Component instances and per-dependency outcomes
//! - The recursive, cycle-guarded resolver

mod instance;
mod key;
mod node;
mod resolver;

pub use instance::{
    ComponentInstance, ComponentInstanceMap, DependencyOutcome, FailureKind, PolicyResolution,
    RejectReason,
};
pub use key::{escape_name, ComponentInstanceKey};
pub use node::{component_order, Frame, NodeOutcome, ResolutionPath, MAX_RESOLUTION_DEPTH};
pub use resolver::{DependencyResolution, Resolver};
