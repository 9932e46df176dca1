//! Per-action metrics.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::action::{Action, ActionKind};
use crate::error::OrchestratorError;

/// Histogram of action durations in seconds.
pub const ACTION_DURATION_METRIC: &str = "orchestrator_action_duration_seconds";

/// Counter of applied actions.
pub const ACTIONS_TOTAL_METRIC: &str = "orchestrator_actions_total";

/// Receives the duration and outcome of every applied action.
pub trait MetricsCollector: Send + Sync {
    /// Records one applied action.
    fn collect_metrics_for(
        &self,
        action: &Action,
        started: Instant,
        error: Option<&OrchestratorError>,
    );
}

/// Emits action metrics through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

/// One recorded action, as kept by [`InMemoryMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSample {
    /// Action kind.
    pub kind: ActionKind,
    /// Target key.
    pub key: String,
    /// Elapsed time.
    pub elapsed: Duration,
    /// Whether the action failed.
    pub failed: bool,
}

/// Collector keeping samples in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<ActionSample>>,
}

const fn result_label(error: Option<&OrchestratorError>) -> &'static str {
    match error {
        None => "success",
        Some(OrchestratorError::Panic { .. }) => "panic",
        Some(_) => "error",
    }
}

impl MetricsCollector for RecorderMetrics {
    fn collect_metrics_for(
        &self,
        action: &Action,
        started: Instant,
        error: Option<&OrchestratorError>,
    ) {
        let kind = action.kind().as_str();
        let result = result_label(error);
        metrics::histogram!(ACTION_DURATION_METRIC, "kind" => kind, "result" => result)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(ACTIONS_TOTAL_METRIC, "kind" => kind, "result" => result).increment(1);
    }
}

impl InMemoryMetrics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every sample recorded so far.
    #[must_use]
    pub fn samples(&self) -> Vec<ActionSample> {
        self.samples.lock().clone()
    }

    /// Number of failed samples.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.samples.lock().iter().filter(|s| s.failed).count()
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn collect_metrics_for(
        &self,
        action: &Action,
        started: Instant,
        error: Option<&OrchestratorError>,
    ) {
        self.samples.lock().push(ActionSample {
            kind: action.kind(),
            key: action.key().to_string(),
            elapsed: started.elapsed(),
            failed: error.is_some(),
        });
    }
}
