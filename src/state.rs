//! Deployment state machine definition.
//!
//! The state is the complete snapshot of one deploy run. The workflow
//! engine mutates it step by step; the durable part (the
//! [`DeploymentRecord`]) is written to the metadata store as it changes.

use crate::gate::DecisionPayload;
use crate::health::HealthOutcome;
use crate::resolver::Resolution;
use crate::rollback::RollbackOutcome;
use crate::store::{current_unix_time, DeploymentRecord};
use serde::{Deserialize, Serialize};

/// Workflow steps, the state machine's nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// Issue the sync command.
    Syncing,
    /// Run the health monitor against the synced application.
    Monitoring,
    /// Healthy after sync.
    Succeeded,
    /// Roll back to the resolved previous revision.
    AutoRollingBack,
    /// The automatic rollback brought the application back.
    RolledBack,
    /// A decision step was injected; this run is done.
    AwaitingManualDecision,
    /// Terminal failure.
    Failed { reason: String },
}

impl Step {
    /// Step name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Syncing => "syncing",
            Step::Monitoring => "monitoring",
            Step::Succeeded => "succeeded",
            Step::AutoRollingBack => "auto_rolling_back",
            Step::RolledBack => "rolled_back",
            Step::AwaitingManualDecision => "awaiting_manual_decision",
            Step::Failed { .. } => "failed",
        }
    }
}

/// Full workflow state for one deploy run.
#[derive(Debug, Clone)]
pub struct DeploymentState {
    /// Application under deployment.
    pub app: String,
    /// Current step in the workflow.
    pub step: Step,

    /// History id live before the sync, once known.
    pub previous_version: Option<u64>,
    /// History id produced by the sync, once known.
    pub current_version: Option<u64>,
    /// Persisted record of this run.
    pub record: Option<DeploymentRecord>,

    // Populated as the workflow progresses
    /// Verdict of the health monitor.
    pub health: Option<HealthOutcome>,
    /// Why the deploy failed, before any rollback.
    pub failure_reason: Option<String>,
    /// Rollback target resolved during failure handling.
    pub rollback_target: Option<Resolution>,
    pub rollback: Option<RollbackOutcome>,
    /// Handed to the decision step in manual mode.
    pub decision: Option<DecisionPayload>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl DeploymentState {
    pub fn new(app: impl Into<String>) -> Self {
        let now = current_unix_time();

        Self {
            app: app.into(),
            step: Step::Syncing,
            previous_version: None,
            current_version: None,
            record: None,
            health: None,
            failure_reason: None,
            rollback_target: None,
            rollback: None,
            decision: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.step,
            Step::Succeeded | Step::RolledBack | Step::AwaitingManualDecision | Step::Failed { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.step, Step::Failed { .. })
    }

    /// Ended in a state the run reports as success (exit 0).
    pub fn is_success(&self) -> bool {
        matches!(
            self.step,
            Step::Succeeded | Step::RolledBack | Step::AwaitingManualDecision
        )
    }

    /// Transition to a new step.
    pub fn transition(&mut self, step: Step) {
        self.step = step;
        self.updated_at = current_unix_time();
    }

    /// Fail the workflow.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.step = Step::Failed {
            reason: reason.into(),
        };
        self.updated_at = current_unix_time();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = DeploymentState::new("web");
        assert_eq!(state.app, "web");
        assert_eq!(state.step, Step::Syncing);
        assert!(state.record.is_none());
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        let mut state = DeploymentState::new("web");

        state.transition(Step::Monitoring);
        assert!(!state.is_terminal());

        state.transition(Step::AwaitingManualDecision);
        assert!(state.is_terminal());
        assert!(state.is_success());

        state.fail("sync_failed");
        assert!(state.is_terminal());
        assert!(state.is_failed());
        assert!(!state.is_success());
        assert_eq!(state.step.name(), "failed");
    }
}
