//! Everything an action needs to apply itself.

use std::sync::Arc;

use super::metrics::{MetricsCollector, RecorderMetrics};
use crate::plugin::PluginRegistry;
use crate::policy::Policy;
use crate::state::SharedActualState;

/// Collaborators handed to every applied action.
#[derive(Clone)]
pub struct ApplyContext {
    /// Actual state being mutated.
    pub state: Arc<SharedActualState>,
    /// Code plugins.
    pub plugins: Arc<dyn PluginRegistry>,
    /// Policy the desired state was resolved from.
    pub policy: Arc<Policy>,
    /// Per-action metrics sink.
    pub metrics: Arc<dyn MetricsCollector>,
}

impl ApplyContext {
    /// Creates a context reporting to the `metrics` facade.
    #[must_use]
    pub fn new(
        state: Arc<SharedActualState>,
        plugins: Arc<dyn PluginRegistry>,
        policy: Arc<Policy>,
    ) -> Self {
        Self {
            state,
            plugins,
            policy,
            metrics: Arc::new(RecorderMetrics),
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for ApplyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyContext")
            .field("instances", &self.state.len())
            .field("policy_objects", &self.policy.len())
            .finish_non_exhaustive()
    }
}
