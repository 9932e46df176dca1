//! Diff engine for comparing actual and desired resolutions.
//!
//! Every key present in either resolution is classified into zero or more
//! actions. Actions are ordered by the height of their instance in the
//! instance graph: the destruction phase (detach, destroy) runs first,
//! tallest instances first, measured in the actual graph; the creation
//! phase (instantiate, update, attach) follows, leaves first, measured in
//! the desired graph. A destroy whose instance is still pointed to by a
//! surviving instance, directly or through other destroyed instances, is
//! moved to the cleanup phase so it runs after that parent's update.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::apply::{Action, ActionKind, Phase};
use crate::resolve::{ComponentInstance, ComponentInstanceMap, PolicyResolution};
use crate::state::ActionCounts;

/// Engine computing the actions that turn actual into desired state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// One action of a diff, with its ordering data.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// The action.
    pub action: Action,
    /// Phase the action is ordered in.
    pub phase: Phase,
    /// Height of the target instance in the graph the phase is ordered by.
    pub height: usize,
    /// Names of the data fields that changed, for updates.
    pub changed_fields: Vec<&'static str>,
}

/// Ordered result of a diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    entries: Vec<DiffEntry>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the ordered actions from `actual` to `desired`.
    #[must_use]
    pub fn compute_diff(&self, actual: &PolicyResolution, desired: &PolicyResolution) -> StateDiff {
        let actual_map = &actual.component_instances;
        let desired_map = &desired.component_instances;
        let actual_heights = graph_heights(actual_map);
        let desired_heights = graph_heights(desired_map);
        let height = |heights: &BTreeMap<String, usize>, key: &str| heights.get(key).copied().unwrap_or(0);
        let deferred = referenced_by_survivors(actual_map, desired_map);

        let mut entries = Vec::new();

        for (key, current) in actual_map {
            let actual_height = height(&actual_heights, key);
            let Some(wanted) = desired_map.get(key) else {
                let mut entry = DiffEntry::new(Action::Destroy { key: key.clone() }, actual_height);
                if deferred.contains(key.as_str()) {
                    entry.phase = Phase::Cleanup;
                }
                entries.push(entry);
                continue;
            };

            for dependency in current.dependency_keys.keys() {
                if !wanted.dependency_keys.contains_key(dependency) {
                    entries.push(DiffEntry::new(
                        Action::DetachDependency {
                            key: key.clone(),
                            dependency: dependency.clone(),
                        },
                        actual_height,
                    ));
                }
            }
        }

        for (key, wanted) in desired_map {
            let desired_height = height(&desired_heights, key);
            let Some(current) = actual_map.get(key) else {
                entries.push(DiffEntry::new(
                    Action::Instantiate {
                        key: key.clone(),
                        instance: Box::new(wanted.clone()),
                    },
                    desired_height,
                ));
                continue;
            };

            let changed_fields = changed_fields(current, wanted);
            if !changed_fields.is_empty() {
                let mut entry = DiffEntry::new(
                    Action::Update {
                        key: key.clone(),
                        instance: Box::new(wanted.clone()),
                    },
                    desired_height,
                );
                entry.changed_fields = changed_fields;
                entries.push(entry);
            }

            for (dependency, depth) in &wanted.dependency_keys {
                if current.dependency_keys.get(dependency) != Some(depth) {
                    entries.push(DiffEntry::new(
                        Action::AttachDependency {
                            key: key.clone(),
                            dependency: dependency.clone(),
                            depth: *depth,
                        },
                        desired_height,
                    ));
                }
            }
        }

        entries.sort_by(|a, b| {
            a.phase
                .cmp(&b.phase)
                .then_with(|| match a.phase {
                    Phase::Destruction | Phase::Cleanup => b.height.cmp(&a.height),
                    Phase::Creation => a.height.cmp(&b.height),
                })
                .then_with(|| a.action.key().cmp(b.action.key()))
                .then_with(|| a.action.kind().cmp(&b.action.kind()))
                .then_with(|| a.action.dependency().cmp(&b.action.dependency()))
        });

        debug!(
            "Diff computed: {} actions over {} actual and {} desired instances",
            entries.len(),
            actual_map.len(),
            desired_map.len()
        );

        StateDiff { entries }
    }
}

impl DiffEntry {
    fn new(action: Action, height: usize) -> Self {
        Self {
            phase: action.phase(),
            action,
            height,
            changed_fields: Vec::new(),
        }
    }
}

impl StateDiff {
    /// Entries in execution order.
    #[must_use]
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    /// Actions in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter().map(|e| &e.action)
    }

    /// Consumes the diff, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<DiffEntry> {
        self.entries
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if actual and desired state match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if applying this diff produces a new revision.
    #[must_use]
    pub fn should_generate_new_revision(&self) -> bool {
        !self.is_empty()
    }

    /// Position of the first action of `kind` on `key`.
    #[must_use]
    pub fn position(&self, kind: ActionKind, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.action.kind() == kind && e.action.key() == key)
    }

    /// Number of actions per kind.
    #[must_use]
    pub fn counts(&self) -> ActionCounts {
        let mut counts = ActionCounts::default();
        for action in self.actions() {
            match action.kind() {
                ActionKind::Instantiate => counts.instantiate += 1,
                ActionKind::Update => counts.update += 1,
                ActionKind::Destroy => counts.destroy += 1,
                ActionKind::AttachDependency => counts.attach += 1,
                ActionKind::DetachDependency => counts.detach += 1,
            }
        }
        counts
    }
}

/// Names the data fields that differ between two views of an instance.
#[must_use]
pub fn changed_fields(current: &ComponentInstance, wanted: &ComponentInstance) -> Vec<&'static str> {
    if current.same_data(wanted) {
        return Vec::new();
    }
    let mut fields = Vec::new();
    if current.calculated_labels != wanted.calculated_labels {
        fields.push("labels");
    }
    if current.calculated_code_params != wanted.calculated_code_params {
        fields.push("code_params");
    }
    if current.calculated_discovery != wanted.calculated_discovery {
        fields.push("discovery");
    }
    if current.edges_out != wanted.edges_out {
        fields.push("edges");
    }
    if current.is_code != wanted.is_code || current.code_type != wanted.code_type {
        fields.push("code_type");
    }
    fields
}

/// Keys that disappear from the graph while an instance that stays still
/// points to them in the actual graph, directly or through other keys that
/// disappear.
fn referenced_by_survivors<'a>(
    actual: &'a ComponentInstanceMap,
    desired: &ComponentInstanceMap,
) -> HashSet<&'a str> {
    let mut parents: HashMap<&str, BTreeSet<&'a str>> = HashMap::new();
    for (key, instance) in actual {
        for edge in &instance.edges_out {
            parents.entry(edge.as_str()).or_default().insert(key.as_str());
        }
    }

    let mut deferred = HashSet::new();
    let mut memo = HashMap::new();
    for key in actual.keys().filter(|key| !desired.contains_key(*key)) {
        let mut on_path = HashSet::new();
        if is_deferred(key, &parents, desired, &mut memo, &mut on_path) {
            deferred.insert(key.as_str());
        }
    }
    deferred
}

fn is_deferred<'a>(
    key: &'a str,
    parents: &HashMap<&str, BTreeSet<&'a str>>,
    desired: &ComponentInstanceMap,
    memo: &mut HashMap<&'a str, bool>,
    on_path: &mut HashSet<&'a str>,
) -> bool {
    if let Some(known) = memo.get(key) {
        return *known;
    }
    if !on_path.insert(key) {
        return false;
    }

    let result = parents.get(key).is_some_and(|keys| {
        keys.iter().any(|parent| {
            desired.contains_key(*parent) || is_deferred(*parent, parents, desired, memo, on_path)
        })
    });

    on_path.remove(key);
    memo.insert(key, result);
    result
}

/// Height of every instance: the longest `edges_out` path to a leaf.
///
/// Edges to keys outside the map are ignored. An edge closing a cycle
/// counts as a leaf so the computation always terminates.
#[must_use]
pub fn graph_heights(instances: &ComponentInstanceMap) -> BTreeMap<String, usize> {
    let mut heights = BTreeMap::new();
    let mut on_path = HashSet::new();
    for key in instances.keys() {
        height_of(key, instances, &mut heights, &mut on_path);
    }
    heights
}

fn height_of(
    key: &str,
    instances: &ComponentInstanceMap,
    heights: &mut BTreeMap<String, usize>,
    on_path: &mut HashSet<String>,
) -> usize {
    if let Some(height) = heights.get(key) {
        return *height;
    }
    let Some(instance) = instances.get(key) else {
        return 0;
    };
    if !on_path.insert(key.to_string()) {
        return 0;
    }

    let height = instance
        .edges_out
        .iter()
        .filter(|edge| instances.contains_key(*edge))
        .map(|edge| height_of(edge, instances, heights, on_path) + 1)
        .max()
        .unwrap_or(0);

    on_path.remove(key);
    heights.insert(key.to_string(), height);
    height
}

impl std::fmt::Display for StateDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "No changes required");
        }
        for entry in &self.entries {
            write!(f, "{}", entry.action)?;
            if !entry.changed_fields.is_empty() {
                write!(f, " ({})", entry.changed_fields.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
