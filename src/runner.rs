//! Mode dispatch for one invocation of the step.
//!
//! Validates the configuration, authenticates, and runs a deploy, a
//! rollback or a decision continuation. Whatever ends the run, a terminal
//! deployment record is left behind for the next run's resolver.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::config::{Command, Config, Mode, RollbackMode};
use crate::error::DeployError;
use crate::gate::{Continuation, ContinuationOutcome, Decision, DecisionPayload};
use crate::notify::{Notification, NotificationKind};
use crate::report::Reporter;
use crate::resolver::RevisionResolver;
use crate::rollback::{save_best_effort, RollbackOrchestrator, RollbackOutcome};
use crate::state::DeploymentState;
use crate::store::{DeploymentLedger, DeploymentRecord, DeploymentStatus, MetadataStore};
use crate::types::RollbackKind;
use crate::workflow::{DeploymentWorkflow, InputRequired, StepResult, WorkflowConfig};
use tracing::{error, info, warn};

/// How the invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Deployed,
    /// A rollback ran, automatic after a failed deploy or requested.
    RolledBack(RollbackOutcome),
    /// A decision step was injected; the pipeline continues there.
    AwaitingManualDecision(DecisionPayload),
    FailureAccepted,
    Failed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Deployed
            | RunOutcome::AwaitingManualDecision(_)
            | RunOutcome::FailureAccepted => true,
            RunOutcome::RolledBack(outcome) => outcome.success,
            RunOutcome::Failed(_) => false,
        }
    }

    /// Process exit code: 0 or 1, nothing else.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunOutcome::Deployed => "deployed",
            RunOutcome::RolledBack(o) if o.success => "rolled_back",
            RunOutcome::RolledBack(_) => "rollback_failed",
            RunOutcome::AwaitingManualDecision(_) => "awaiting_manual_decision",
            RunOutcome::FailureAccepted => "failure_accepted",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

pub struct Runner<'a, B: ArgoBackend, A: PipelineAgent> {
    config: &'a Config,
    backend: &'a B,
    agent: &'a A,
    store: &'a dyn MetadataStore,
}

impl<'a, B: ArgoBackend, A: PipelineAgent> Runner<'a, B, A> {
    pub fn new(
        config: &'a Config,
        backend: &'a B,
        agent: &'a A,
        store: &'a dyn MetadataStore,
    ) -> Self {
        Self {
            config,
            backend,
            agent,
            store,
        }
    }

    /// Run the configured mode. An `Err` has already been recorded and
    /// reported; the caller only has to exit non-zero.
    pub async fn run(&self) -> Result<RunOutcome, DeployError> {
        let result = self.dispatch().await;
        if let Err(e) = &result {
            error!(error = %e, fatal = e.is_fatal(), "run aborted");
            self.record_abort(e).await;
        }
        result
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            rollback_mode: self.config.rollback_mode,
            operation_timeout_secs: self.config.operation_timeout_secs(),
            health: self.config.health_settings(),
            report: self.config.report_settings(),
            resume_env: self.config.resume_env(),
        }
    }

    async fn dispatch(&self) -> Result<RunOutcome, DeployError> {
        self.config.validate()?;

        if let Some(Command::Resume { payload }) = &self.config.command {
            return self.resume(payload).await;
        }

        let app = self.config.app_name()?;
        self.backend.login().await?;

        match self.config.mode {
            Mode::Deploy => self.deploy(app).await,
            Mode::Rollback => self.rollback(app).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // MODES
    // ═══════════════════════════════════════════════════════════════

    async fn deploy(&self, app: &str) -> Result<RunOutcome, DeployError> {
        info!(app = %app, rollback_mode = ?self.config.rollback_mode, "deploying");
        let workflow = DeploymentWorkflow::new(self.backend, self.agent, self.store, self.workflow_config());

        let mut state = DeploymentState::new(app);
        let result = workflow.run_to_completion(&mut state).await?;

        Ok(match result {
            StepResult::Complete => match state.rollback {
                Some(outcome) => RunOutcome::RolledBack(outcome),
                None => RunOutcome::Deployed,
            },
            StepResult::NeedsInput(InputRequired::ManualDecision { payload }) => {
                RunOutcome::AwaitingManualDecision(payload)
            }
            StepResult::Failed(reason) => match state.rollback {
                Some(outcome) => RunOutcome::RolledBack(outcome),
                None => RunOutcome::Failed(reason),
            },
            StepResult::Continue => {
                return Err(DeployError::InvalidState(format!(
                    "workflow stopped at {}",
                    state.step.name()
                )))
            }
        })
    }

    async fn rollback(&self, app: &str) -> Result<RunOutcome, DeployError> {
        let (target, kind) = match self.config.rollback_mode {
            RollbackMode::Manual => (
                self.config.target_revision.clone().unwrap_or_default(),
                RollbackKind::Explicit,
            ),
            RollbackMode::Auto => {
                let resolved = RevisionResolver::new(self.backend, self.store)
                    .resolve_previous(app)
                    .await?
                    .ok_or_else(|| {
                        DeployError::NotFound(format!("no previous version of {} to roll back to", app))
                    })?;
                (resolved.history_id.to_string(), RollbackKind::Automatic)
            }
        };

        info!(app = %app, target = %target, kind = kind.label(), "rolling back");
        let outcome = RollbackOrchestrator::new(
            self.backend,
            self.agent,
            self.store,
            self.config.operation_timeout_secs(),
            self.config.report_settings(),
        )
        .rollback(app, &target, kind)
        .await?;

        Ok(RunOutcome::RolledBack(outcome))
    }

    async fn resume(&self, raw: &str) -> Result<RunOutcome, DeployError> {
        let payload = DecisionPayload::from_json(raw)?;
        info!(app = %payload.app, history_id = payload.history_id, "resuming after decision");

        let continuation =
            Continuation::new(self.backend, self.agent, self.store, self.config.report_settings());
        let decision = continuation.decision(&payload).await?;
        if decision == Decision::Rollback {
            self.config.credentials()?;
        }
        let outcome = continuation.apply(&payload, decision).await?;

        Ok(match outcome {
            ContinuationOutcome::RolledBack(outcome) => RunOutcome::RolledBack(outcome),
            ContinuationOutcome::Accepted => RunOutcome::FailureAccepted,
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // ABORT HANDLING
    // ═══════════════════════════════════════════════════════════════

    fn record_app(&self) -> Option<String> {
        match &self.config.command {
            Some(Command::Resume { payload }) => DecisionPayload::from_json(payload).ok().map(|p| p.app),
            None => self.config.app_name().ok().map(str::to_string),
        }
    }

    fn is_rollback_run(&self) -> bool {
        self.config.command.is_some() || self.config.mode == Mode::Rollback
    }

    /// Leave a terminal record and a report behind for an aborted run.
    async fn record_abort(&self, err: &DeployError) {
        let Some(app) = self.record_app() else {
            warn!("no application known, nothing recorded");
            return;
        };
        let ledger = DeploymentLedger::new(self.store);

        let existing = match ledger.load_record(&app).await {
            Ok(record) => record,
            Err(e) => {
                warn!(app = %app, error = %e, "could not load deployment record");
                None
            }
        };

        let resumed = self.config.command.is_some();
        match terminal_record(&app, existing, self.is_rollback_run(), resumed, err) {
            Some(record) => save_best_effort(&ledger, &record).await,
            None => info!(app = %app, "no rollback started, keeping the deployment record"),
        }

        let kind = if self.is_rollback_run() {
            let kind = match (&self.config.command, self.config.rollback_mode) {
                (None, RollbackMode::Manual) => RollbackKind::Explicit,
                _ => RollbackKind::Automatic,
            };
            NotificationKind::rollback(kind, false)
        } else {
            NotificationKind::DeployFailed
        };

        // Nothing reached the controller for these, so don't ask it for logs.
        let mut report = self.config.report_settings();
        if matches!(err, DeployError::Configuration(_) | DeployError::Connectivity(_)) {
            report.collect_logs = false;
        }

        Reporter::new(self.backend, self.agent, report)
            .conclude(&Notification::new(kind, app.as_str(), err.to_string()))
            .await;
    }
}

/// Close `existing` if this run left it open, otherwise start and close a
/// fresh record that keeps the known previous version.
///
/// A resumed run that never started its rollback leaves the closed record
/// from the paused deploy alone (`None`).
fn terminal_record(
    app: &str,
    existing: Option<DeploymentRecord>,
    rollback_run: bool,
    resumed: bool,
    err: &DeployError,
) -> Option<DeploymentRecord> {
    let reason = err.to_string();

    if let Some(mut record) = existing.clone() {
        let next = match record.status {
            DeploymentStatus::Deploying => Some(DeploymentStatus::Failed),
            DeploymentStatus::RollingBack => Some(DeploymentStatus::RollbackFailed),
            _ => None,
        };
        match next {
            Some(next) => {
                if record.transition(next, reason.as_str()).is_ok() {
                    return Some(record);
                }
            }
            None if resumed => return None,
            None => {}
        }
    }

    let previous = existing.and_then(|r| r.previous_version);
    let mut record = if rollback_run {
        DeploymentRecord::rolling_back(app, previous, None)
    } else {
        DeploymentRecord::deploying(app, previous)
    };
    let status = if rollback_run {
        DeploymentStatus::RollbackFailed
    } else {
        DeploymentStatus::Failed
    };
    if let Err(e) = record.transition(status, reason) {
        warn!(app = %app, error = %e, "unexpected record state");
    }
    Some(record)
}
