//! Structured event log.
//!
//! An [`EventLog`] records every decision taken during a resolution pass
//! (context selection, rule matches, rejections, failures). Entries are
//! level-tagged, optionally bound to a dependency, queryable by level and
//! substring, and forwarded to `tracing` as they are appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Severity of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Fine-grained decision detail.
    Debug,
    /// Notable outcome.
    Info,
    /// Suspicious but non-fatal condition.
    Warn,
    /// Failure.
    Error,
}

/// A single log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Entry severity.
    pub level: EventLevel,
    /// Entry text.
    pub message: String,
    /// Dependency the entry belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Append-only, queryable event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<Event>,
    /// Dependency attached to every new entry.
    #[serde(skip)]
    dependency: Option<String>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty log whose entries are bound to a dependency.
    #[must_use]
    pub fn for_dependency(dependency: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            dependency: Some(dependency.into()),
        }
    }

    /// Appends an entry and forwards it to `tracing`.
    pub fn log(&mut self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        let dep = self.dependency.as_deref().unwrap_or("-");
        match level {
            EventLevel::Debug => debug!(dependency = dep, "{message}"),
            EventLevel::Info => info!(dependency = dep, "{message}"),
            EventLevel::Warn => warn!(dependency = dep, "{message}"),
            EventLevel::Error => error!(dependency = dep, "{message}"),
        }
        self.entries.push(Event {
            level,
            message,
            dependency: self.dependency.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Appends a debug entry.
    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(EventLevel::Debug, message);
    }

    /// Appends an info entry.
    pub fn info(&mut self, message: impl Into<String>) {
        self.log(EventLevel::Info, message);
    }

    /// Appends a warning entry.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(EventLevel::Warn, message);
    }

    /// Appends an error entry.
    pub fn error(&mut self, message: impl Into<String>) {
        self.log(EventLevel::Error, message);
    }

    /// Moves all entries of `other` to the end of this log.
    pub fn append(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Returns all entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[Event] {
        &self.entries
    }

    /// Returns entries of exactly `level` whose message contains `needle`.
    #[must_use]
    pub fn find(&self, level: EventLevel, needle: &str) -> Vec<&Event> {
        self.entries
            .iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .collect()
    }

    /// Returns true if an entry of `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: EventLevel, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Returns entries at or above `level`.
    #[must_use]
    pub fn at_least(&self, level: EventLevel) -> Vec<&Event> {
        self.entries.iter().filter(|e| e.level >= level).collect()
    }

    /// Returns the entries bound to a dependency.
    #[must_use]
    pub fn for_key(&self, dependency: &str) -> Vec<&Event> {
        self.entries
            .iter()
            .filter(|e| e.dependency.as_deref() == Some(dependency))
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}
