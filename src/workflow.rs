//! Deployment Workflow Engine
//!
//! The state machine that drives a deploy: sync, monitor health, and on
//! failure either roll back on its own or hand the decision to a human.
//! It transitions between steps and calls the collaborators; persistence
//! goes through the metadata store it is given.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::config::RollbackMode;
use crate::error::DeployError;
use crate::gate::{DecisionPayload, ManualDecisionGate};
use crate::health::{HealthCheckSettings, HealthMonitor};
use crate::notify::{Notification, NotificationKind};
use crate::report::{ReportSettings, Reporter};
use crate::resolver::{Resolution, RevisionResolver};
use crate::rollback::{save_best_effort, RollbackOrchestrator};
use crate::state::{DeploymentState, Step};
use crate::store::{DeploymentLedger, DeploymentStatus, HistoryOutcome, MetadataStore};
use crate::types::RollbackKind;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// What to do when the deploy turns out unhealthy.
    pub rollback_mode: RollbackMode,
    /// Passed through to sync, rollback and wait (seconds).
    pub operation_timeout_secs: u64,
    pub health: HealthCheckSettings,
    pub report: ReportSettings,
    /// Environment handed to the decision follow-up step.
    pub resume_env: BTreeMap<String, String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            rollback_mode: RollbackMode::Auto,
            operation_timeout_secs: 300,
            health: HealthCheckSettings::default(),
            report: ReportSettings::default(),
            resume_env: BTreeMap::new(),
        }
    }
}

/// Result of advancing one step.
#[derive(Debug)]
pub enum StepResult {
    /// Keep going, call advance() again.
    Continue,
    /// Workflow is waiting on something outside this run.
    NeedsInput(InputRequired),
    /// Done successfully.
    Complete,
    /// Failed.
    Failed(String),
}

/// What input the workflow needs.
#[derive(Debug)]
pub enum InputRequired {
    /// A human must choose between rolling back and accepting the failure.
    /// The injected follow-up step carries the payload.
    ManualDecision { payload: DecisionPayload },
}

/// The deployment workflow engine.
///
/// Parameterized by the controller backend and CI agent.
pub struct DeploymentWorkflow<'a, B: ArgoBackend, A: PipelineAgent> {
    backend: &'a B,
    agent: &'a A,
    store: &'a dyn MetadataStore,
    config: WorkflowConfig,
}

impl<'a, B: ArgoBackend, A: PipelineAgent> DeploymentWorkflow<'a, B, A> {
    pub fn new(
        backend: &'a B,
        agent: &'a A,
        store: &'a dyn MetadataStore,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            backend,
            agent,
            store,
            config,
        }
    }

    /// Retry the health check only when failure handling is automatic; a
    /// human should not wait for the whole budget to see a failure.
    pub fn health_retry_enabled(&self) -> bool {
        self.config.rollback_mode != RollbackMode::Manual
    }

    /// Advance the workflow by one step.
    ///
    /// Call this in a loop until you get Complete, Failed, or NeedsInput.
    pub async fn advance(&self, state: &mut DeploymentState) -> Result<StepResult, DeployError> {
        let result = match &state.step {
            Step::Syncing => self.step_sync(state).await,
            Step::Monitoring => self.step_monitor(state).await,
            Step::AutoRollingBack => self.step_auto_rollback(state).await,
            Step::Succeeded | Step::RolledBack => return Ok(StepResult::Complete),
            Step::AwaitingManualDecision => {
                let payload = state.decision.clone().ok_or_else(|| {
                    DeployError::InvalidState("decision payload missing".into())
                })?;
                return Ok(StepResult::NeedsInput(InputRequired::ManualDecision { payload }));
            }
            Step::Failed { reason } => return Ok(StepResult::Failed(reason.clone())),
        };

        // Save after every step, even on error the record may have moved
        if let Some(record) = &state.record {
            save_best_effort(&DeploymentLedger::new(self.store), record).await;
        }

        result
    }

    /// Run until a terminal step or until input is needed.
    pub async fn run_to_completion(
        &self,
        state: &mut DeploymentState,
    ) -> Result<StepResult, DeployError> {
        loop {
            match self.advance(state).await? {
                StepResult::Continue => continue,
                other => return Ok(other),
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // STEP IMPLEMENTATIONS
    // ═══════════════════════════════════════════════════════════════

    async fn step_sync(&self, state: &mut DeploymentState) -> Result<StepResult, DeployError> {
        let app = state.app.clone();

        state.previous_version = self.latest_history_id(&app).await;
        state.record = Some(crate::store::DeploymentRecord::deploying(
            app.as_str(),
            state.previous_version,
        ));
        info!(app = %app, previous = ?state.previous_version, "syncing");

        if let Err(e) = self
            .backend
            .sync(&app, self.config.operation_timeout_secs)
            .await
        {
            error!(app = %app, error = %e, "sync failed");
            let reason = "sync_failed";
            self.finish_record(state, DeploymentStatus::Failed, reason)?;
            self.conclude(Notification::new(
                NotificationKind::DeployFailed,
                app.as_str(),
                format!("{}: {}", reason, e),
            ))
            .await;
            state.fail(reason);
            return Ok(StepResult::Failed(reason.into()));
        }

        state.transition(Step::Monitoring);
        Ok(StepResult::Continue)
    }

    async fn step_monitor(&self, state: &mut DeploymentState) -> Result<StepResult, DeployError> {
        let app = state.app.clone();
        let outcome = HealthMonitor::new(self.backend, self.config.health)
            .monitor(&app, self.health_retry_enabled())
            .await;
        state.health = Some(outcome);

        state.current_version = self.latest_history_id(&app).await;
        if let Some(record) = state.record.as_mut() {
            record.current_version = state.current_version;
        }

        if outcome.is_healthy() {
            if let Some(id) = state.current_version {
                self.record_outcome(&app, id, HistoryOutcome::Success).await;
            }
            self.finish_record(state, DeploymentStatus::Deployed, "success")?;

            let mut notification = Notification::new(NotificationKind::DeploySuccess, app.as_str(), "");
            if let Some(id) = state.current_version {
                notification = notification.with_history_id(id);
            }
            self.conclude(notification).await;

            info!(app = %app, "deployment healthy");
            state.transition(Step::Succeeded);
            return Ok(StepResult::Complete);
        }

        let reason = outcome.reason();
        warn!(app = %app, reason, health = %outcome.status(), "deployment unhealthy");
        state.failure_reason = Some(reason.to_string());

        // A sync that produced no new history entry leaves the previous
        // entry current; it is not the one that failed.
        if let Some(id) = state.current_version {
            if state.previous_version != Some(id) {
                self.record_outcome(&app, id, HistoryOutcome::Failed).await;
            }
        }

        self.handle_failure(state, reason).await
    }

    async fn handle_failure(
        &self,
        state: &mut DeploymentState,
        reason: &str,
    ) -> Result<StepResult, DeployError> {
        let app = state.app.clone();
        let target = match RevisionResolver::new(self.backend, self.store)
            .resolve_previous(&app)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(app = %app, error = %e, "could not resolve previous revision");
                None
            }
        };

        match self.config.rollback_mode {
            RollbackMode::Auto => match target {
                Some(target) => {
                    info!(app = %app, history_id = target.history_id, "rolling back automatically");
                    state.rollback_target = Some(target);
                    state.transition(Step::AutoRollingBack);
                    Ok(StepResult::Continue)
                }
                None => {
                    let failure = "no previous version";
                    error!(app = %app, reason, "{}, not rolling back", failure);
                    self.finish_record(state, DeploymentStatus::Failed, reason)?;
                    self.conclude(Notification::new(
                        NotificationKind::DeployFailed,
                        app.as_str(),
                        format!("{}; {}", reason, failure),
                    ))
                    .await;
                    state.fail(failure);
                    Ok(StepResult::Failed(failure.into()))
                }
            },
            RollbackMode::Manual => self.open_gate(state, target, reason).await,
        }
    }

    async fn open_gate(
        &self,
        state: &mut DeploymentState,
        target: Option<Resolution>,
        reason: &str,
    ) -> Result<StepResult, DeployError> {
        let app = state.app.clone();
        let gate = ManualDecisionGate::new(self.agent, self.config.resume_env.clone());

        match gate
            .open(&app, target.as_ref(), self.config.operation_timeout_secs, reason)
            .await
        {
            Ok(payload) => {
                self.finish_record(
                    state,
                    DeploymentStatus::Failed,
                    format!("{}; awaiting manual decision", reason),
                )?;

                let notification = Notification::new(
                    NotificationKind::ManualDecisionRequired,
                    app.as_str(),
                    reason,
                )
                .with_history_id(payload.history_id)
                .with_revision(payload.target_revision.as_str());
                self.conclude(notification).await;

                state.rollback_target = target;
                state.decision = Some(payload.clone());
                state.transition(Step::AwaitingManualDecision);
                Ok(StepResult::NeedsInput(InputRequired::ManualDecision { payload }))
            }
            Err(e) => {
                error!(app = %app, error = %e, "decision gate refused");
                self.finish_record(state, DeploymentStatus::Failed, reason)?;
                self.conclude(Notification::new(
                    NotificationKind::DeployFailed,
                    app.as_str(),
                    format!("{}; {}", reason, e),
                ))
                .await;
                let failure = e.to_string();
                state.fail(failure.as_str());
                Ok(StepResult::Failed(failure))
            }
        }
    }

    async fn step_auto_rollback(
        &self,
        state: &mut DeploymentState,
    ) -> Result<StepResult, DeployError> {
        let target = state.rollback_target.clone().ok_or_else(|| {
            DeployError::InvalidState("rollback target missing at AutoRollingBack".into())
        })?;
        let record = state.record.clone().ok_or_else(|| {
            DeployError::InvalidState("deployment record missing at AutoRollingBack".into())
        })?;
        let reason = state
            .failure_reason
            .clone()
            .unwrap_or_else(|| "deploy_failed".to_string());

        let outcome = RollbackOrchestrator::new(
            self.backend,
            self.agent,
            self.store,
            self.config.operation_timeout_secs,
            self.config.report.clone(),
        )
        .rollback_from(
            record,
            &target.history_id.to_string(),
            RollbackKind::Automatic,
            &reason,
        )
        .await?;

        state.record = Some(outcome.record.clone());
        let success = outcome.success;
        let detail = outcome.reason.clone();
        state.rollback = Some(outcome);

        if success {
            state.transition(Step::RolledBack);
            Ok(StepResult::Complete)
        } else {
            let failure = format!("rollback failed: {}", detail);
            state.fail(failure.as_str());
            Ok(StepResult::Failed(failure))
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════

    async fn latest_history_id(&self, app: &str) -> Option<u64> {
        match self.backend.history(app).await {
            Ok(window) => window.latest().map(|e| e.id),
            Err(e) => {
                warn!(app = %app, error = %e, "could not read history");
                None
            }
        }
    }

    async fn record_outcome(&self, app: &str, history_id: u64, outcome: HistoryOutcome) {
        if let Err(e) = DeploymentLedger::new(self.store)
            .record_outcome(app, history_id, outcome)
            .await
        {
            warn!(app = %app, history_id, error = %e, "failed to record history outcome");
        }
    }

    fn finish_record(
        &self,
        state: &mut DeploymentState,
        status: DeploymentStatus,
        result: impl Into<String>,
    ) -> Result<(), DeployError> {
        let step = state.step.name();
        let record = state.record.as_mut().ok_or_else(|| {
            DeployError::InvalidState(format!("deployment record missing at {}", step))
        })?;
        record.transition(status, result)
    }

    async fn conclude(&self, notification: Notification) {
        Reporter::new(self.backend, self.agent, self.config.report.clone())
            .conclude(&notification)
            .await;
    }
}
