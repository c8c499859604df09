//! [`DeploymentRecord`]: durable memory of the last orchestration run.

use crate::error::DeployError;
use serde::{Deserialize, Serialize};

/// Lifecycle status of one deploy or rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Deployed,
    RollingBack,
    RolledBack,
    Failed,
    RollbackFailed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollbackFailed => "rollback_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deployed
                | DeploymentStatus::RolledBack
                | DeploymentStatus::Failed
                | DeploymentStatus::RollbackFailed
        )
    }

    /// Allowed moves within one run:
    /// `deploying → {deployed | failed | rolling_back → {rolled_back | rollback_failed}}`.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Deploying, Deployed)
                | (Deploying, Failed)
                | (Deploying, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, RollbackFailed)
        )
    }
}

/// Persisted per application. Never read by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub app: String,
    pub status: DeploymentStatus,
    /// Free-form outcome detail (`success`, a failure reason, ...).
    #[serde(default)]
    pub result: String,
    /// History id this run deployed or rolled back to.
    #[serde(default)]
    pub current_version: Option<u64>,
    /// History id that was live before this run started.
    #[serde(default)]
    pub previous_version: Option<u64>,
    /// Unix seconds of the last update.
    pub timestamp: u64,
}

impl DeploymentRecord {
    /// Start a deploy attempt.
    pub fn deploying(app: impl Into<String>, previous_version: Option<u64>) -> Self {
        Self {
            app: app.into(),
            status: DeploymentStatus::Deploying,
            result: String::new(),
            current_version: None,
            previous_version,
            timestamp: current_unix_time(),
        }
    }

    /// Start a standalone rollback attempt.
    pub fn rolling_back(
        app: impl Into<String>,
        previous_version: Option<u64>,
        target: Option<u64>,
    ) -> Self {
        Self {
            app: app.into(),
            status: DeploymentStatus::RollingBack,
            result: String::new(),
            current_version: target,
            previous_version,
            timestamp: current_unix_time(),
        }
    }

    /// Move to `next`, rejecting anything outside the run's monotonic order.
    pub fn transition(
        &mut self,
        next: DeploymentStatus,
        result: impl Into<String>,
    ) -> Result<(), DeployError> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidState(format!(
                "deployment record for {}: {} -> {} not allowed",
                self.app,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.result = result.into();
        self.timestamp = current_unix_time();
        Ok(())
    }
}

/// Whether a historical deployment concluded successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Success,
    Failed,
}

impl HistoryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryOutcome::Success => "success",
            HistoryOutcome::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "success" => Some(HistoryOutcome::Success),
            "failed" => Some(HistoryOutcome::Failed),
            _ => None,
        }
    }
}

pub(crate) fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
