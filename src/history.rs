//! Typed decode of controller output.
//!
//! Everything downstream of this module works on [`HistoryWindow`] and
//! [`AppView`], never on raw CLI text.

use crate::error::DeployError;
use crate::types::{HealthStatus, HistoryEntry, HistoryWindow};
use serde::Deserialize;

/// The parts of `app get --output json` the orchestrators read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppView {
    /// `.status.health.status`
    pub health: HealthStatus,
    /// `.spec.syncPolicy.automated` is present and non-null.
    pub auto_sync: bool,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(default)]
    spec: RawSpec,
    #[serde(default)]
    status: RawStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawSpec {
    sync_policy: Option<RawSyncPolicy>,
}

#[derive(Deserialize)]
struct RawSyncPolicy {
    automated: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct RawStatus {
    health: Option<RawHealth>,
}

#[derive(Deserialize)]
struct RawHealth {
    #[serde(default)]
    status: String,
}

/// Decode `app get --output json`.
pub fn decode_app(json: &str) -> Result<AppView, DeployError> {
    let raw: RawApp = serde_json::from_str(json)
        .map_err(|e| DeployError::Decode(format!("app get: {}", e)))?;

    let health = raw
        .status
        .health
        .map(|h| HealthStatus::from_controller(&h.status))
        .unwrap_or(HealthStatus::Unknown);

    let auto_sync = raw
        .spec
        .sync_policy
        .and_then(|p| p.automated)
        .is_some_and(|v| !v.is_null());

    Ok(AppView { health, auto_sync })
}

/// Decode the tabular `app history` output.
///
/// ```text
/// SOURCE  https://github.com/org/deploy.git
/// ID      DATE                           REVISION
/// 7       2024-05-01 10:00:00 +0000 UTC  4f1c2a9 (main)
/// 8       2024-05-02 11:30:00 +0000 UTC  9be07d1 (main)
/// ```
///
/// Rows are located by the `ID` header and the revision is read at the
/// header's `REVISION` column offset. Lines whose first token is not a
/// number are skipped.
pub fn parse_history(output: &str) -> Result<HistoryWindow, DeployError> {
    if output.trim().is_empty() {
        return Ok(HistoryWindow::default());
    }

    let mut revision_offset: Option<usize> = None;
    let mut entries = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("ID") && line.contains("REVISION") {
            revision_offset = line.find("REVISION");
            continue;
        }

        let Some(offset) = revision_offset else {
            continue;
        };

        let mut tokens = trimmed.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        if !first.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let id: u64 = first
            .parse()
            .map_err(|e| DeployError::Decode(format!("history id {:?}: {}", first, e)))?;

        let revision = line
            .get(offset..)
            .and_then(|rest| rest.split_whitespace().next())
            .or_else(|| trimmed.split_whitespace().last())
            .unwrap_or_default()
            .to_string();

        let deployed_at = line
            .get(..offset)
            .map(|head| head.trim_start().trim_start_matches(first).trim().to_string())
            .unwrap_or_default();

        entries.push(HistoryEntry {
            id,
            revision,
            deployed_at,
            position: 0,
        });
    }

    if revision_offset.is_none() {
        return Err(DeployError::Decode(
            "app history: header row with ID and REVISION not found".into(),
        ));
    }

    Ok(HistoryWindow::new(entries))
}
