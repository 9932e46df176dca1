//! Resolution frames and per-node helpers.
//!
//! The resolver walks contracts depth-first. The active path is an
//! explicit stack of [`Frame`]s owned by the walk; re-entering a frame that
//! is already on the stack is a cycle.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{PolicyError, ResolveError};
use crate::policy::{Component, Service};

use super::instance::RejectReason;

/// Upper bound on nested contract recursion. Acyclic chains deeper than
/// this fail as a policy error, not as a cycle.
pub const MAX_RESOLUTION_DEPTH: usize = 128;

/// One level of the active resolution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Service namespace.
    pub namespace: String,
    /// Service name.
    pub service: String,
    /// Selected context.
    pub context: String,
    /// Resolved allocation keys.
    pub allocation_keys: Vec<String>,
}

/// Stack of frames currently being resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPath {
    frames: Vec<Frame>,
}

/// Result of resolving one contract node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node resolved to a service instance.
    Resolved {
        /// Key of the service instance.
        key: String,
        /// Discovery tree published by the service's components.
        discovery: Map<String, Value>,
    },
    /// A rule rejected the node.
    Rejected {
        /// What was rejected.
        reason: RejectReason,
        /// Rule that rejected it.
        rule: String,
    },
}

impl ResolutionPath {
    /// Creates an empty path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a frame.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ResolutionCycle`] if the frame is already on
    /// the path, or [`ResolveError::DepthLimitExceeded`] if the path already
    /// holds [`MAX_RESOLUTION_DEPTH`] frames.
    pub fn enter(&mut self, frame: Frame) -> Result<(), ResolveError> {
        if self.frames.contains(&frame) {
            return Err(ResolveError::ResolutionCycle {
                path: self.describe_with(&frame),
            });
        }
        if self.frames.len() >= MAX_RESOLUTION_DEPTH {
            return Err(ResolveError::DepthLimitExceeded {
                limit: MAX_RESOLUTION_DEPTH,
                path: self.describe_with(&frame),
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the innermost frame.
    pub fn leave(&mut self) {
        self.frames.pop();
    }

    /// Returns the number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the path is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn describe_with(&self, last: &Frame) -> String {
        self.frames
            .iter()
            .chain(std::iter::once(last))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}", self.namespace, self.service, self.context)?;
        for key in &self.allocation_keys {
            write!(f, ",{key}")?;
        }
        write!(f, "]")
    }
}

/// Orders the components of a service so that every component comes after
/// the siblings it depends on.
///
/// Ties keep declaration order. Dependencies on unknown components are
/// ignored.
///
/// # Errors
///
/// Returns [`PolicyError::ComponentCycle`] if the components depend on each
/// other in a loop.
pub fn component_order(service: &Service) -> Result<Vec<&Component>, PolicyError> {
    let names: HashSet<&str> = service.components.iter().map(|c| c.name.as_str()).collect();
    let mut pending: BTreeMap<usize, usize> = service
        .components
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let count = c
                .dependencies
                .iter()
                .filter(|d| names.contains(d.as_str()))
                .collect::<HashSet<_>>()
                .len();
            (idx, count)
        })
        .collect();

    let mut ordered: Vec<&Component> = Vec::with_capacity(service.components.len());
    while !pending.is_empty() {
        let Some(next) = pending
            .iter()
            .find(|(_, count)| **count == 0)
            .map(|(idx, _)| *idx)
        else {
            let cycle = pending
                .keys()
                .filter_map(|idx| service.components.get(*idx))
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PolicyError::ComponentCycle {
                service: service.metadata.name.clone(),
                cycle,
            });
        };

        pending.remove(&next);
        let Some(component) = service.components.get(next) else {
            continue;
        };
        for (idx, count) in &mut pending {
            let depends = service
                .components
                .get(*idx)
                .is_some_and(|c| c.dependencies.iter().any(|d| d == &component.name));
            if depends {
                *count = count.saturating_sub(1);
            }
        }
        ordered.push(component);
    }

    Ok(ordered)
}
