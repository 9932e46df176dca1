//! Plan executor.
//!
//! Waves run one after the other. Within a wave every runnable action is
//! spawned on its own task, bounded by a semaphore; one action's failure
//! does not stop the others in the same wave, but it blocks every later
//! action listing the failed key as a prerequisite.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::action::Action;
use super::context::ApplyContext;
use crate::event::EventLog;
use crate::planner::{ApplyPlan, PlannedAction, Wave};

/// Default bound on concurrently applied actions.
pub const DEFAULT_MAX_PARALLEL_ACTIONS: usize = 8;

/// Executor for apply plans.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    ctx: ApplyContext,
    max_parallel_actions: usize,
    continue_on_error: bool,
}

/// Outcome of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action was applied.
    Succeeded,
    /// The action returned an error or panicked.
    Failed,
    /// A prerequisite did not complete, or the run was aborted.
    Skipped,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Action that was executed.
    pub action: Action,
    /// Outcome.
    pub status: ActionStatus,
    /// Error message (if failed or skipped).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Individual action results, in plan order.
    pub results: Vec<ActionResult>,
    /// Total actions executed.
    pub total_executed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions.
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
    /// Per-action log.
    pub events: EventLog,
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(ctx: ApplyContext) -> Self {
        Self {
            ctx,
            max_parallel_actions: DEFAULT_MAX_PARALLEL_ACTIONS,
            continue_on_error: true,
        }
    }

    /// Sets the bound on concurrently applied actions (at least 1).
    #[must_use]
    pub fn with_max_parallel_actions(mut self, max: usize) -> Self {
        self.max_parallel_actions = max.max(1);
        self
    }

    /// Sets whether waves after a failing wave still run.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Returns the context actions are applied with.
    #[must_use]
    pub const fn context(&self) -> &ApplyContext {
        &self.ctx
    }

    /// Executes a plan.
    pub async fn execute(&self, plan: &ApplyPlan) -> ExecutionResult {
        info!("Executing apply plan with {} actions", plan.action_count());

        let mut results = Vec::with_capacity(plan.action_count());
        let mut events = EventLog::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for wave in &plan.waves {
            if aborted {
                for planned in &wave.actions {
                    events.warn(format!("Skipped {}: apply aborted", planned.action));
                    results.push(ActionResult::skipped(planned, "apply aborted after a failed wave"));
                }
                continue;
            }

            let wave_results = self.execute_wave(wave, &blocked, &mut events).await;
            let wave_failed = wave_results
                .iter()
                .any(|r| r.status == ActionStatus::Failed);

            for result in &wave_results {
                if result.status != ActionStatus::Succeeded {
                    blocked.insert(result.action.key().to_string());
                }
            }
            results.extend(wave_results);

            if wave_failed && !self.continue_on_error {
                error!("Wave failed, aborting remaining actions");
                aborted = true;
            }
        }

        let successful = results
            .iter()
            .filter(|r| r.status == ActionStatus::Succeeded)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == ActionStatus::Skipped)
            .count();

        let result = ExecutionResult {
            total_executed: results.len(),
            successful,
            failed,
            skipped,
            success: failed == 0 && skipped == 0,
            results,
            events,
        };
        info!("{}", result);
        result
    }

    async fn execute_wave(
        &self,
        wave: &Wave,
        blocked: &HashSet<String>,
        events: &mut EventLog,
    ) -> Vec<ActionResult> {
        let mut slots: Vec<Option<ActionResult>> = vec![None; wave.actions.len()];
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_actions));
        let mut tasks = JoinSet::new();

        for (index, planned) in wave.actions.iter().enumerate() {
            if let Some(prerequisite) = first_blocked(&planned.prerequisites, blocked) {
                warn!("Skipping {}: prerequisite '{}' did not complete", planned.action, prerequisite);
                events.warn(format!(
                    "Skipped {}: prerequisite '{prerequisite}' did not complete",
                    planned.action
                ));
                slots[index] = Some(ActionResult::skipped(
                    planned,
                    format!("prerequisite '{prerequisite}' did not complete"),
                ));
                continue;
            }

            let action = planned.action.clone();
            let ctx = self.ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = action.apply(&ctx).await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(()))) => {
                    let action = &wave.actions[index].action;
                    events.info(format!("Applied {action}"));
                    slots[index] = Some(ActionResult::succeeded(action));
                }
                Ok((index, Err(e))) => {
                    let action = &wave.actions[index].action;
                    error!("Action {} failed: {}", action, e);
                    events.error(format!("Failed {action}: {e}"));
                    slots[index] = Some(ActionResult::failed(action, e.to_string()));
                }
                Err(e) => error!("Apply task did not complete: {}", e),
            }
        }

        wave.actions
            .iter()
            .zip(slots)
            .map(|(planned, slot)| {
                slot.unwrap_or_else(|| {
                    ActionResult::failed(&planned.action, "apply task did not complete".to_string())
                })
            })
            .collect()
    }
}

fn first_blocked<'a>(prerequisites: &'a BTreeSet<String>, blocked: &HashSet<String>) -> Option<&'a str> {
    prerequisites
        .iter()
        .find(|key| blocked.contains(*key))
        .map(String::as_str)
}

impl ActionResult {
    fn succeeded(action: &Action) -> Self {
        Self {
            action: action.clone(),
            status: ActionStatus::Succeeded,
            error: None,
        }
    }

    fn failed(action: &Action, error: String) -> Self {
        Self {
            action: action.clone(),
            status: ActionStatus::Failed,
            error: Some(error),
        }
    }

    fn skipped(planned: &PlannedAction, reason: impl Into<String>) -> Self {
        Self {
            action: planned.action.clone(),
            status: ActionStatus::Skipped,
            error: Some(reason.into()),
        }
    }
}

impl ExecutionResult {
    /// Returns true if all actions succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success
    }

    /// Results of actions that did not succeed.
    pub fn problems(&self) -> impl Iterator<Item = &ActionResult> {
        self.results
            .iter()
            .filter(|r| r.status != ActionStatus::Succeeded)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed, self.successful, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::metrics::InMemoryMetrics;
    use crate::error::PluginError;
    use crate::event::EventLevel;
    use crate::plugin::registry::MockCodePlugin;
    use crate::plugin::{StaticPluginRegistry, ANY_TYPE};
    use crate::planner::DiffEngine;
    use crate::policy::Policy;
    use crate::resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution};
    use crate::state::SharedActualState;
    use crate::test_support::{resolution, PolicyBuilder};

    fn node(service: &str, edges: &[&ComponentInstance]) -> ComponentInstance {
        let key = ComponentInstanceKey::for_service("east", "", "main", "c", "default", vec![], service)
            .with_component("app");
        let mut instance = ComponentInstance::new(key);
        instance.is_code = true;
        instance.code_type = Some(String::from("raw"));
        instance.add_dependency("main:dependency:d", 0);
        for edge in edges {
            instance.add_edge(edge.key.key());
        }
        instance
    }

    fn executor(
        plugin: MockCodePlugin,
        actual: &PolicyResolution,
    ) -> (PlanExecutor, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::new());
        let policy: Arc<Policy> = Arc::new(PolicyBuilder::new().cluster("east").build());
        let registry = StaticPluginRegistry::new().with_plugin(ANY_TYPE, ANY_TYPE, Arc::new(plugin));
        let ctx = ApplyContext::new(Arc::new(SharedActualState::new(actual)), Arc::new(registry), policy)
            .with_metrics(metrics.clone());
        (PlanExecutor::new(ctx), metrics)
    }

    fn plan(actual: &PolicyResolution, desired: &PolicyResolution) -> ApplyPlan {
        let diff = DiffEngine::new().compute_diff(actual, desired);
        ApplyPlan::from_diff(diff, actual, desired, "hash")
    }

    #[tokio::test]
    async fn test_applies_full_graph() {
        let mut plugin = MockCodePlugin::new();
        plugin.expect_create().times(3).returning(|_| Ok(()));

        let c = node("c", &[]);
        let b = node("b", &[&c]);
        let a = node("a", &[&b]);
        let desired = resolution(&[&a, &b, &c]);
        let actual = PolicyResolution::new();
        let (executor, metrics) = executor(plugin, &actual);

        let result = executor.execute(&plan(&actual, &desired)).await;

        assert!(result.all_successful());
        assert_eq!(result.successful, 3);
        assert_eq!(executor.context().state.len(), 3);
        assert_eq!(metrics.samples().len(), 3);
        assert_eq!(result.to_string(), "Executed 3 actions: 3 successful, 0 failed, 0 skipped");
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_only() {
        let mut plugin = MockCodePlugin::new();
        plugin.expect_create().returning(|_| Ok(()));

        // `leaf` fails; `root` depends on it; `other` is independent.
        let leaf = {
            let mut n = node("leaf", &[]);
            n.code_type = Some(String::from("broken"));
            n
        };
        let other = node("other", &[]);
        let root = node("root", &[&leaf]);
        let desired = resolution(&[&leaf, &other, &root]);
        let actual = PolicyResolution::new();

        let mut broken = MockCodePlugin::new();
        broken
            .expect_create()
            .returning(|p| Err(PluginError::call_failed("create", &p.deploy_name, "no capacity").into()));

        let metrics = Arc::new(InMemoryMetrics::new());
        let registry = StaticPluginRegistry::new()
            .with_plugin(ANY_TYPE, ANY_TYPE, Arc::new(plugin))
            .with_plugin(ANY_TYPE, "broken", Arc::new(broken));
        let ctx = ApplyContext::new(
            Arc::new(SharedActualState::new(&actual)),
            Arc::new(registry),
            Arc::new(PolicyBuilder::new().cluster("east").build()),
        )
        .with_metrics(metrics.clone());
        let executor = PlanExecutor::new(ctx);

        let result = executor.execute(&plan(&actual, &desired)).await;

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(!result.all_successful());
        assert!(executor.context().state.contains(&other.key.key()));
        assert!(!executor.context().state.contains(&root.key.key()));
        assert!(result.events.contains(EventLevel::Warn, "did not complete"));
        assert!(result.events.contains(EventLevel::Error, "no capacity"));
        // Skipped actions are never applied, so they report no metrics.
        assert_eq!(metrics.samples().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_after_failed_wave() {
        let mut plugin = MockCodePlugin::new();
        plugin
            .expect_create()
            .returning(|p| Err(PluginError::call_failed("create", &p.deploy_name, "down").into()));

        let leaf = node("leaf", &[]);
        let mut root = node("root", &[]);
        // Taller than `leaf` without depending on it.
        let mid = node("mid", &[]);
        root.add_edge(mid.key.key());
        let desired = resolution(&[&leaf, &mid, &root]);
        let actual = PolicyResolution::new();
        let (executor, _) = executor(plugin, &actual);
        let executor = executor.with_continue_on_error(false);

        let result = executor.execute(&plan(&actual, &desired)).await;

        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped, 1);
        assert!(result
            .problems()
            .any(|r| r.error.as_deref() == Some("apply aborted after a failed wave")));
    }

    #[tokio::test]
    async fn test_failed_parent_update_keeps_old_child() {
        let mut plugin = MockCodePlugin::new();
        plugin.expect_create().times(1).returning(|_| Ok(()));
        plugin
            .expect_update()
            .returning(|p| Err(PluginError::call_failed("update", &p.deploy_name, "rejected").into()));
        plugin.expect_destroy().times(0);

        let old_child = node("x", &[]);
        let new_child = node("y", &[]);
        let before = node("a", &[&old_child]);
        let mut after = before.clone();
        after.edges_out.clear();
        after.add_edge(new_child.key.key());
        let actual = resolution(&[&before, &old_child]);
        let desired = resolution(&[&after, &new_child]);
        let (executor, _) = executor(plugin, &actual);

        let result = executor.execute(&plan(&actual, &desired)).await;

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(executor.context().state.contains(&old_child.key.key()));
        assert!(executor.context().state.contains(&new_child.key.key()));
    }

    #[tokio::test]
    async fn test_destroy_in_reverse_order() {
        let mut plugin = MockCodePlugin::new();
        plugin.expect_destroy().times(2).returning(|_| Ok(()));

        let leaf = node("leaf", &[]);
        let root = node("root", &[&leaf]);
        let actual = resolution(&[&leaf, &root]);
        let desired = PolicyResolution::new();
        let (executor, metrics) = executor(plugin, &actual);

        let result = executor
            .with_max_parallel_actions(1)
            .execute(&plan(&actual, &desired))
            .await;

        assert!(result.all_successful());
        let order: Vec<_> = metrics.samples().into_iter().map(|s| s.key).collect();
        assert_eq!(order, vec![root.key.key(), leaf.key.key()]);
    }
}
