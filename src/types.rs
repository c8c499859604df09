//! Minimal domain types for the deploy/rollback workflow.
//!
//! These are the types the orchestrators need. Nothing more.
//! Controller truth lives in the controller; these are views of it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application health as reported by the controller.
///
/// Derived fresh on every check, never cached beyond one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Unknown,
}

impl HealthStatus {
    /// Parse the controller's `.status.health.status` value.
    ///
    /// Anything unrecognised (including an empty string) is `Unknown`.
    pub fn from_controller(raw: &str) -> Self {
        match raw.trim() {
            "Healthy" => HealthStatus::Healthy,
            "Progressing" => HealthStatus::Progressing,
            "Degraded" => HealthStatus::Degraded,
            "Suspended" => HealthStatus::Suspended,
            "Missing" => HealthStatus::Missing,
            _ => HealthStatus::Unknown,
        }
    }

    /// Terminal-bad signals that short-circuit any retry loop.
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Missing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Progressing => "Progressing",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Suspended => "Suspended",
            HealthStatus::Missing => "Missing",
            HealthStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the controller's deployment history.
///
/// `id` is controller-assigned and strictly increasing within the
/// retained window. `position` is the row's index in that window,
/// oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub revision: String,
    pub deployed_at: String,
    pub position: usize,
}

impl HistoryEntry {
    /// Whether `target` names this entry's revision.
    ///
    /// Containment in either direction so short and long SHA forms match.
    pub fn matches_revision(&self, target: &str) -> bool {
        let target = target.trim();
        if target.is_empty() || self.revision.is_empty() {
            return false;
        }
        self.revision == target || self.revision.contains(target) || target.contains(&self.revision)
    }
}

/// The controller's bounded history window for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryWindow {
    entries: Vec<HistoryEntry>,
}

impl HistoryWindow {
    /// Build a window, ordering by id and dropping duplicate ids.
    pub fn new(mut entries: Vec<HistoryEntry>) -> Self {
        entries.sort_by_key(|e| e.id);
        entries.dedup_by_key(|e| e.id);
        for (position, entry) in entries.iter_mut().enumerate() {
            entry.position = position;
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Most recent deployment (the one currently live).
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Entry `n` places from the end; `nth_from_last(1)` is the latest.
    pub fn nth_from_last(&self, n: usize) -> Option<&HistoryEntry> {
        if n == 0 || n > self.entries.len() {
            return None;
        }
        self.entries.get(self.entries.len() - n)
    }

    /// Newest-to-oldest iteration.
    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }
}

/// Controller sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    Manual,
    Automated,
}

impl SyncPolicy {
    /// Value passed to `app set --sync-policy`.
    pub fn as_arg(&self) -> &'static str {
        match self {
            SyncPolicy::Manual => "manual",
            SyncPolicy::Automated => "automated",
        }
    }
}

/// Who asked for a rollback, which decides whether it waits for health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackKind {
    /// Triggered by the orchestrator after a failed deploy.
    Automatic,
    /// Requested by a human with a chosen target.
    Explicit,
}

impl RollbackKind {
    pub fn label(&self) -> &'static str {
        match self {
            RollbackKind::Automatic => "auto",
            RollbackKind::Explicit => "manual",
        }
    }
}

/// CI annotation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStyle {
    Success,
    Error,
    Warning,
    Info,
}

impl AnnotationStyle {
    pub fn as_arg(&self) -> &'static str {
        match self {
            AnnotationStyle::Success => "success",
            AnnotationStyle::Error => "error",
            AnnotationStyle::Warning => "warning",
            AnnotationStyle::Info => "info",
        }
    }
}
