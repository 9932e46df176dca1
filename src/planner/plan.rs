//! Apply plans.
//!
//! A plan groups the ordered actions of a diff into waves. Actions of one
//! wave share a phase and a height and may run concurrently; waves run one
//! after the other. Each action carries the keys whose actions must have
//! succeeded before it may run.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::diff::StateDiff;
use crate::apply::{Action, Phase};
use crate::resolve::PolicyResolution;
use crate::state::ActionCounts;

/// A complete apply plan.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the policy the desired state was resolved from.
    pub policy_hash: String,
    /// Waves in execution order.
    pub waves: Vec<Wave>,
    /// Number of actions per kind.
    pub counts: ActionCounts,
}

/// Actions that may run concurrently.
#[derive(Debug, Clone)]
pub struct Wave {
    /// Phase of every action in the wave.
    pub phase: Phase,
    /// Height of every target instance.
    pub height: usize,
    /// Planned actions.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// The action.
    pub action: Action,
    /// Keys whose failure or skip blocks this action.
    pub prerequisites: BTreeSet<String>,
    /// Names of changed data fields, for updates.
    pub changed_fields: Vec<&'static str>,
}

impl ApplyPlan {
    /// Builds a plan from a diff.
    ///
    /// Creation-phase actions wait for the instances their target points to
    /// in the desired graph. Destruction and cleanup actions wait for the
    /// instances pointing to their target in the actual graph, so a failed
    /// update of a surviving parent keeps its old child alive.
    #[must_use]
    pub fn from_diff(
        diff: StateDiff,
        actual: &PolicyResolution,
        desired: &PolicyResolution,
        policy_hash: &str,
    ) -> Self {
        let counts = diff.counts();
        let parents = reverse_edges(actual);
        let mut waves: Vec<Wave> = Vec::new();

        for entry in diff.into_entries() {
            let phase = entry.phase;
            let key = entry.action.key();
            let prerequisites = match phase {
                Phase::Creation => desired
                    .get(key)
                    .map(|instance| instance.edges_out.clone())
                    .unwrap_or_default(),
                Phase::Destruction | Phase::Cleanup => parents.get(key).cloned().unwrap_or_default(),
            };
            let planned = PlannedAction {
                action: entry.action,
                prerequisites,
                changed_fields: entry.changed_fields,
            };

            match waves.last_mut() {
                Some(wave) if wave.phase == phase && wave.height == entry.height => {
                    wave.actions.push(planned);
                }
                _ => waves.push(Wave {
                    phase,
                    height: entry.height,
                    actions: vec![planned],
                }),
            }
        }

        Self {
            created_at: Utc::now(),
            policy_hash: policy_hash.to_string(),
            waves,
            counts,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(policy_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            policy_hash: policy_hash.to_string(),
            waves: vec![],
            counts: ActionCounts::default(),
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.waves.iter().map(|w| w.actions.len()).sum()
    }

    /// Returns every planned action in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.waves.iter().flat_map(|w| w.actions.iter())
    }
}

/// Maps every key to the keys with an edge to it.
fn reverse_edges(resolution: &PolicyResolution) -> BTreeMap<String, BTreeSet<String>> {
    let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (key, instance) in &resolution.component_instances {
        for edge in &instance.edges_out {
            parents.entry(edge.clone()).or_default().insert(key.clone());
        }
    }
    parents
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action)?;
        if !self.changed_fields.is_empty() {
            write!(f, " ({})", self.changed_fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Destruction => "destruction",
            Self::Creation => "creation",
            Self::Cleanup => "cleanup",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ApplyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Apply Plan ({} actions: {}):", self.action_count(), self.counts)?;
        for (i, wave) in self.waves.iter().enumerate() {
            writeln!(f, "  wave {i} [{} @ height {}]", wave.phase, wave.height)?;
            for action in &wave.actions {
                writeln!(f, "    - {action}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DiffEngine;
    use crate::test_support::{instance, resolution};

    #[test]
    fn test_waves_follow_height() {
        let c = instance("c", "app", &[]);
        let d = instance("d", "app", &[]);
        let b = instance("b", "app", &[&c, &d]);
        let desired = resolution(&[&b, &c, &d]);
        let actual = PolicyResolution::new();

        let diff = DiffEngine::new().compute_diff(&actual, &desired);
        let plan = ApplyPlan::from_diff(diff, &actual, &desired, "hash");

        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0].actions.len(), 2);
        assert_eq!(plan.waves[1].height, 1);
        let root = &plan.waves[1].actions[0];
        assert!(root.prerequisites.contains(&c.key.key()));
        assert!(root.prerequisites.contains(&d.key.key()));
        assert_eq!(plan.counts.instantiate, 3);
        assert!(plan.to_string().contains("wave 1 [creation @ height 1]"));
    }

    #[test]
    fn test_destruction_waits_for_parents() {
        let c = instance("c", "app", &[]);
        let b = instance("b", "app", &[&c]);
        let actual = resolution(&[&b, &c]);
        let desired = PolicyResolution::new();

        let diff = DiffEngine::new().compute_diff(&actual, &desired);
        let plan = ApplyPlan::from_diff(diff, &actual, &desired, "hash");

        assert_eq!(plan.waves[0].phase, Phase::Destruction);
        assert_eq!(plan.waves[0].actions[0].action.key(), b.key.key());
        let leaf = &plan.waves[1].actions[0];
        assert_eq!(leaf.prerequisites, BTreeSet::from([b.key.key()]));
    }

    #[test]
    fn test_replaced_child_outlives_parent_update() {
        let x = instance("x", "db", &[]);
        let y = instance("y", "db", &[]);
        let before = instance("a", "app", &[&x]);
        let mut after = before.clone();
        after.edges_out.clear();
        after.add_edge(y.key.key());
        let actual = resolution(&[&before, &x]);
        let desired = resolution(&[&after, &y]);

        let diff = DiffEngine::new().compute_diff(&actual, &desired);
        let plan = ApplyPlan::from_diff(diff, &actual, &desired, "hash");

        let phases: Vec<_> = plan.waves.iter().map(|w| w.phase).collect();
        assert_eq!(phases, vec![Phase::Creation, Phase::Creation, Phase::Cleanup]);
        assert_eq!(plan.waves[0].actions[0].action.key(), y.key.key());
        assert_eq!(plan.waves[1].actions[0].action.key(), before.key.key());

        let destroy = &plan.waves[2].actions[0];
        assert_eq!(destroy.action, Action::Destroy { key: x.key.key() });
        assert_eq!(destroy.prerequisites, BTreeSet::from([before.key.key()]));
        assert!(plan.to_string().contains("wave 2 [cleanup @ height 0]"));
    }

    #[test]
    fn test_empty_plan() {
        let plan = ApplyPlan::empty("hash");
        assert!(plan.is_empty());
        assert_eq!(plan.action_count(), 0);
        assert_eq!(plan.to_string(), "No changes required");
    }
}
