//! End-to-end reconciliation pass.
//!
//! One pass resolves the policy into a desired state, diffs it against the
//! recorded actual state, applies the resulting plan under the state lock,
//! and persists the new actual state together with a revision. A failed
//! action never rolls back what already succeeded; running the pass again
//! converges incrementally.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::apply::{ApplyContext, ExecutionResult, MetricsCollector, PlanExecutor, DEFAULT_MAX_PARALLEL_ACTIONS};
use crate::config::KeyHasher;
use crate::error::Result;
use crate::event::EventLog;
use crate::external::ExternalData;
use crate::planner::{ApplyPlan, DiffEngine};
use crate::plugin::{CollectedResources, InstanceEndpoints, PluginRegistry, ResourceCollector};
use crate::policy::Policy;
use crate::resolve::{DependencyOutcome, PolicyResolution, Resolver};
use crate::state::{
    generate_holder_id, ActionCounts, Revision, RevisionStatus, SharedActualState, StateStore,
    StoredState,
};

/// Runs resolve, diff and apply against one state store.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// Policy being reconciled.
    policy: Arc<Policy>,
    /// Users and secrets.
    external: ExternalData,
    /// Code plugins.
    plugins: Arc<dyn PluginRegistry>,
    /// State store.
    state_store: &'a S,
    /// Metrics sink override.
    metrics: Option<Arc<dyn MetricsCollector>>,
    /// Policy hasher.
    hasher: KeyHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    max_parallel_actions: usize,
    continue_on_error: bool,
    holder: String,
}

/// Desired state and the plan that would reach it.
#[derive(Debug, Clone)]
pub struct PassPlan {
    /// Stored state the plan starts from.
    pub stored: StoredState,
    /// Freshly resolved desired state.
    pub desired: PolicyResolution,
    /// Ordered actions.
    pub plan: ApplyPlan,
}

/// Result of a reconciliation run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether every action succeeded.
    pub success: bool,
    /// Generation of the state after the run.
    pub generation: u64,
    /// Planned actions per kind.
    pub counts: ActionCounts,
    /// Number of successful actions.
    pub succeeded: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions.
    pub skipped: usize,
    /// Revision recorded by this run, if any.
    pub revision: Option<Revision>,
    /// Outcome per dependency.
    pub outcomes: BTreeMap<String, DependencyOutcome>,
    /// Errors of actions that did not succeed.
    pub errors: Vec<String>,
    /// Resolution and apply log.
    #[serde(skip)]
    pub events: EventLog,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Actions that would bring actual state to the desired one.
    pub pending_actions: Vec<String>,
    /// Number of desired instances.
    pub desired_count: usize,
    /// Number of actual instances.
    pub actual_count: usize,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        policy: Arc<Policy>,
        external: ExternalData,
        plugins: Arc<dyn PluginRegistry>,
        state_store: &'a S,
    ) -> Self {
        Self {
            policy,
            external,
            plugins,
            state_store,
            metrics: None,
            hasher: KeyHasher::new(),
            diff_engine: DiffEngine::new(),
            max_parallel_actions: DEFAULT_MAX_PARALLEL_ACTIONS,
            continue_on_error: true,
            holder: generate_holder_id(),
        }
    }

    /// Sets the bound on concurrently applied actions.
    #[must_use]
    pub const fn with_max_parallel_actions(mut self, max: usize) -> Self {
        self.max_parallel_actions = max;
        self
    }

    /// Sets whether waves after a failing wave still run.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Replaces the metrics sink used for applied actions.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolves the desired state against the stored actual state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or a resolution task
    /// could not be joined.
    pub async fn resolve(&self) -> Result<(StoredState, PolicyResolution)> {
        let stored = self.state_store.load_or_default().await?;
        let resolver = Resolver::new(Arc::clone(&self.policy), self.external.clone());
        let desired = resolver.resolve_all(&stored.actual).await?;
        Ok((stored, desired))
    }

    /// Resolves and plans without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails.
    pub async fn plan(&self) -> Result<PassPlan> {
        let (stored, desired) = self.resolve().await?;
        let diff = self.diff_engine.compute_diff(&stored.actual, &desired);
        info!("Diff: {}", diff.counts());

        let policy_hash = self.hasher.hash_policy(&self.policy);
        let plan = if diff.is_empty() {
            ApplyPlan::empty(&policy_hash)
        } else {
            ApplyPlan::from_diff(diff, &stored.actual, &desired, &policy_hash)
        };

        Ok(PassPlan {
            stored,
            desired,
            plan,
        })
    }

    /// Performs a full reconciliation under the state lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, resolution fails,
    /// or the new state cannot be saved. Failed actions are reported in
    /// the result, not as an error.
    pub async fn reconcile(&self) -> Result<ReconciliationResult> {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let result = self.reconcile_locked().await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {}", lock.lock_id, e);
        }
        result
    }

    async fn reconcile_locked(&self) -> Result<ReconciliationResult> {
        let PassPlan {
            mut stored,
            desired,
            plan,
        } = self.plan().await?;

        if plan.is_empty() {
            info!("No changes required - state is converged");
        } else {
            info!("{}", plan);
        }

        let shared = Arc::new(SharedActualState::new(&stored.actual));
        let execution = self.execute(&plan, Arc::clone(&shared)).await;
        info!("{}", execution);

        let PolicyResolution {
            dependency_outcomes,
            events: mut log,
            ..
        } = desired;
        log.append(execution.events.clone());

        stored.set_actual(PolicyResolution {
            component_instances: shared.snapshot(),
            dependency_outcomes: dependency_outcomes.clone(),
            events: EventLog::new(),
        });

        let errors = problem_messages(&execution);
        let revision = if plan.is_empty() {
            None
        } else {
            let mut revision = Revision::new(
                stored.generation() + 1,
                &plan.policy_hash,
                plan.counts,
                revision_status(&execution),
            );
            revision.errors.clone_from(&errors);
            stored.add_revision(revision.clone());
            Some(revision)
        };

        self.state_store.save(&stored).await?;

        Ok(ReconciliationResult {
            success: execution.success,
            generation: stored.generation(),
            counts: plan.counts,
            succeeded: execution.successful,
            failed: execution.failed,
            skipped: execution.skipped,
            revision,
            outcomes: dependency_outcomes,
            errors,
            events: log,
        })
    }

    async fn execute(&self, plan: &ApplyPlan, state: Arc<SharedActualState>) -> ExecutionResult {
        let mut ctx = ApplyContext::new(state, Arc::clone(&self.plugins), Arc::clone(&self.policy));
        if let Some(metrics) = &self.metrics {
            ctx = ctx.with_metrics(Arc::clone(metrics));
        }
        PlanExecutor::new(ctx)
            .with_max_parallel_actions(self.max_parallel_actions)
            .with_continue_on_error(self.continue_on_error)
            .execute(plan)
            .await
    }

    /// Checks for drift without applying changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the drift check fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let pass = self.plan().await?;
        Ok(DriftReport {
            has_drift: !pass.plan.is_empty(),
            pending_actions: pass.plan.actions().map(ToString::to_string).collect(),
            desired_count: pass.desired.component_instances.len(),
            actual_count: pass.stored.actual.component_instances.len(),
        })
    }

    /// Lists endpoints of every dependency in the actual state.
    ///
    /// # Errors
    ///
    /// Returns the first plugin or lookup error.
    pub async fn endpoints(&self) -> Result<BTreeMap<String, Vec<InstanceEndpoints>>> {
        let stored = self.state_store.load_or_default().await?;
        let collector = ResourceCollector::new(Arc::clone(&self.policy), Arc::clone(&self.plugins));

        let mut result = BTreeMap::new();
        for dependency in stored.actual.dependency_outcomes.keys() {
            let endpoints = collector
                .dependency_endpoints(&stored.actual, dependency)
                .await?;
            if !endpoints.is_empty() {
                result.insert(dependency.clone(), endpoints);
            }
        }
        Ok(result)
    }

    /// Collects plugin resources of one dependency in the actual state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded. Plugin failures are
    /// carried in [`CollectedResources::error`].
    pub async fn dependency_resources(&self, dependency: &str) -> Result<CollectedResources> {
        let stored = self.state_store.load_or_default().await?;
        let collector = ResourceCollector::new(Arc::clone(&self.policy), Arc::clone(&self.plugins));
        Ok(collector.dependency_resources(&stored.actual, dependency).await)
    }
}

fn revision_status(execution: &ExecutionResult) -> RevisionStatus {
    if execution.success {
        RevisionStatus::Applied
    } else if execution.successful == 0 {
        RevisionStatus::Failed
    } else {
        RevisionStatus::PartiallyApplied
    }
}

fn problem_messages(execution: &ExecutionResult) -> Vec<String> {
    execution
        .problems()
        .map(|r| {
            format!(
                "{} {}: {}",
                r.status,
                r.action,
                r.error.as_deref().unwrap_or("no reason recorded")
            )
        })
        .collect()
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for action in &self.pending_actions {
                writeln!(f, "  - {action}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status} (generation {}):", self.generation)?;
        writeln!(f, "  Planned: {}", self.counts)?;
        writeln!(f, "  Succeeded: {}", self.succeeded)?;
        writeln!(f, "  Failed: {}", self.failed)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}
