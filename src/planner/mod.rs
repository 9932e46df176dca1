//! Planning module for reconciliation.
//!
//! This module compares actual and desired resolutions and turns the
//! resulting actions into an ordered, wave-grouped apply plan.

mod diff;
mod plan;

pub use diff::{changed_fields, graph_heights, DiffEngine, DiffEntry, StateDiff};
pub use plan::{ApplyPlan, PlannedAction, Wave};
