//! Label sets and label transforms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label selecting the cluster code components are deployed to.
pub const LABEL_CLUSTER: &str = "cluster";

/// Label selecting the target suffix (namespace) inside a cluster.
pub const LABEL_TARGET: &str = "target";

/// Label transform carried by rules and contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelOperations {
    /// Labels to set (overwriting existing values).
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    /// Labels to remove.
    #[serde(default)]
    pub remove: Vec<String>,
}

/// An ordered set of string labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            labels: BTreeMap::new(),
        }
    }

    /// Returns a new set with `overlay` applied on top of this one.
    #[must_use]
    pub fn add_labels(&self, overlay: &BTreeMap<String, String>) -> Self {
        let mut labels = self.labels.clone();
        labels.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { labels }
    }

    /// Applies a transform in place, returning true if anything changed.
    pub fn apply_transform(&mut self, ops: &LabelOperations) -> bool {
        let mut changed = false;
        for (key, value) in &ops.set {
            if self.labels.get(key) != Some(value) {
                self.labels.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        for key in &ops.remove {
            changed |= self.labels.remove(key).is_some();
        }
        changed
    }

    /// Gets a label value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Returns the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns true if the set has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for LabelSet {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            labels: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_overrides() {
        let base = LabelSet::from([("env", "dev"), ("team", "a")]);
        let overlay: BTreeMap<String, String> =
            [(String::from("env"), String::from("prod"))].into_iter().collect();

        let merged = base.add_labels(&overlay);
        assert_eq!(merged.get("env"), Some("prod"));
        assert_eq!(merged.get("team"), Some("a"));
        assert_eq!(base.get("env"), Some("dev"));
    }

    #[test]
    fn test_apply_transform_reports_changes() {
        let mut labels = LabelSet::from([("env", "dev")]);
        let ops = LabelOperations {
            set: [(String::from("env"), String::from("dev"))].into_iter().collect(),
            remove: vec![],
        };
        assert!(!labels.apply_transform(&ops));

        let ops = LabelOperations {
            set: [(String::from("tier"), String::from("gold"))].into_iter().collect(),
            remove: vec![String::from("env")],
        };
        assert!(labels.apply_transform(&ops));
        assert_eq!(labels.get("tier"), Some("gold"));
        assert_eq!(labels.get("env"), None);
    }
}
