//! Persisted state types.
//!
//! The state document records the actual resolution (what is believed to
//! be deployed) and the history of revisions that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolve::PolicyResolution;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of revisions kept in the state document.
pub const MAX_REVISIONS: usize = 100;

/// The persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    /// State format version.
    pub version: String,
    /// Actual state.
    pub actual: PolicyResolution,
    /// Recent revisions, oldest first.
    #[serde(default)]
    pub revisions: Vec<Revision>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
}

/// Number of actions per kind in one revision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionCounts {
    /// Instances created.
    pub instantiate: usize,
    /// Instances updated.
    pub update: usize,
    /// Instances destroyed.
    pub destroy: usize,
    /// Dependencies attached.
    pub attach: usize,
    /// Dependencies detached.
    pub detach: usize,
}

/// Outcome of applying a revision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    /// Every action succeeded.
    Applied,
    /// Some actions failed or were skipped.
    PartiallyApplied,
    /// No action succeeded.
    Failed,
}

/// One applied change of the actual state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// Monotonic revision number, starting at 1.
    pub generation: u64,
    /// Hash of the policy the revision was resolved from.
    pub policy_hash: String,
    /// When the revision was recorded.
    pub created_at: DateTime<Utc>,
    /// Planned actions per kind.
    pub counts: ActionCounts,
    /// Apply outcome.
    pub status: RevisionStatus,
    /// Error messages of failed actions.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StoredState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            actual: PolicyResolution::new(),
            revisions: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Generation of the latest revision, 0 if none.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.revisions.last().map_or(0, |r| r.generation)
    }

    /// Returns the latest revision.
    #[must_use]
    pub fn last_revision(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Replaces the actual state.
    pub fn set_actual(&mut self, actual: PolicyResolution) {
        self.actual = actual;
        self.last_updated = Utc::now();
    }

    /// Appends a revision, dropping the oldest past [`MAX_REVISIONS`].
    pub fn add_revision(&mut self, revision: Revision) {
        if self.revisions.len() >= MAX_REVISIONS {
            self.revisions.remove(0);
        }
        self.revisions.push(revision);
        self.last_updated = Utc::now();
    }
}

impl Default for StoredState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCounts {
    /// Total number of actions.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.instantiate + self.update + self.destroy + self.attach + self.detach
    }
}

impl Revision {
    /// Creates a revision.
    #[must_use]
    pub fn new(
        generation: u64,
        policy_hash: impl Into<String>,
        counts: ActionCounts,
        status: RevisionStatus,
    ) -> Self {
        Self {
            generation,
            policy_hash: policy_hash.into(),
            created_at: Utc::now(),
            counts,
            status,
            errors: Vec::new(),
        }
    }
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Applied => "applied",
            Self::PartiallyApplied => "partially applied",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for ActionCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to instantiate, {} to update, {} to destroy, {} to attach, {} to detach",
            self.instantiate, self.update, self.destroy, self.attach, self.detach
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_history_is_bounded() {
        let mut state = StoredState::new();
        for generation in 1..=(MAX_REVISIONS as u64 + 5) {
            state.add_revision(Revision::new(
                generation,
                "abc",
                ActionCounts::default(),
                RevisionStatus::Applied,
            ));
        }
        assert_eq!(state.revisions.len(), MAX_REVISIONS);
        assert_eq!(state.revisions[0].generation, 6);
        assert_eq!(state.generation(), MAX_REVISIONS as u64 + 5);
    }

    #[test]
    fn test_counts_total() {
        let counts = ActionCounts {
            instantiate: 2,
            destroy: 1,
            ..ActionCounts::default()
        };
        assert_eq!(counts.total(), 3);
        assert!(counts.to_string().starts_with("2 to instantiate"));
    }
}
