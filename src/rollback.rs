//! Rollback Orchestrator
//!
//! Rolls an application back to a resolved history entry with automated
//! sync paused, records the outcome and reports it. The result is final
//! for the run: the caller turns it into the process exit.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::error::DeployError;
use crate::guard::AutoSyncGuard;
use crate::notify::{Notification, NotificationKind};
use crate::report::{ReportSettings, Reporter};
use crate::resolver::RevisionResolver;
use crate::store::{DeploymentLedger, DeploymentRecord, DeploymentStatus, HistoryOutcome, MetadataStore};
use crate::types::RollbackKind;
use tracing::{error, info, warn};

/// What a rollback attempt ended as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub success: bool,
    pub kind: RollbackKind,
    pub history_id: Option<u64>,
    pub reason: String,
    pub record: DeploymentRecord,
}

impl RollbackOutcome {
    pub fn notification_kind(&self) -> NotificationKind {
        NotificationKind::rollback(self.kind, self.success)
    }
}

pub struct RollbackOrchestrator<'a, B: ArgoBackend, A: PipelineAgent> {
    backend: &'a B,
    agent: &'a A,
    store: &'a dyn MetadataStore,
    operation_timeout_secs: u64,
    report: ReportSettings,
}

impl<'a, B: ArgoBackend, A: PipelineAgent> RollbackOrchestrator<'a, B, A> {
    pub fn new(
        backend: &'a B,
        agent: &'a A,
        store: &'a dyn MetadataStore,
        operation_timeout_secs: u64,
        report: ReportSettings,
    ) -> Self {
        Self {
            backend,
            agent,
            store,
            operation_timeout_secs,
            report,
        }
    }

    /// Standalone rollback of `app` to `target` (a history id or a source
    /// revision). Starts a fresh deployment record.
    pub async fn rollback(
        &self,
        app: &str,
        target: &str,
        kind: RollbackKind,
    ) -> Result<RollbackOutcome, DeployError> {
        self.execute(app, target, kind, None).await
    }

    /// Rollback continuing a deploy record from the same run.
    pub async fn rollback_from(
        &self,
        record: DeploymentRecord,
        target: &str,
        kind: RollbackKind,
        reason: &str,
    ) -> Result<RollbackOutcome, DeployError> {
        let app = record.app.clone();
        self.execute(&app, target, kind, Some((record, reason))).await
    }

    async fn execute(
        &self,
        app: &str,
        target: &str,
        kind: RollbackKind,
        continuing: Option<(DeploymentRecord, &str)>,
    ) -> Result<RollbackOutcome, DeployError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(DeployError::Configuration(
                "rollback target revision is empty".into(),
            ));
        }

        let ledger = DeploymentLedger::new(self.store);
        let resolver = RevisionResolver::new(self.backend, self.store);

        let history_id = match resolver.resolve_history_id(app, target).await {
            Ok(found) => found,
            Err(e) => {
                warn!(app = %app, target = %target, error = %e, "could not resolve rollback target");
                None
            }
        };

        let mut record = match continuing {
            Some((mut record, reason)) => {
                record.transition(DeploymentStatus::RollingBack, reason)?;
                record.current_version = history_id.or(record.current_version);
                record
            }
            None => {
                let live = self.live_version(app).await;
                DeploymentRecord::rolling_back(app, live, history_id)
            }
        };
        save_best_effort(&ledger, &record).await;

        let Some(history_id) = history_id else {
            let reason = format!("rollback target {} not found in history", target);
            error!(app = %app, target = %target, "{}", reason);
            return Ok(self.finish(record, kind, None, Err(reason)).await);
        };

        info!(app = %app, history_id, kind = kind.label(), "rolling back");

        let timeout = self.operation_timeout_secs;
        let result = AutoSyncGuard::new(self.backend)
            .run(app, || async {
                self.backend.rollback(app, history_id, timeout).await?;
                if kind == RollbackKind::Automatic {
                    self.backend.wait_healthy(app, timeout).await?;
                }
                Ok::<(), DeployError>(())
            })
            .await;

        let result = result.map_err(|e| e.to_string());
        if result.is_ok() {
            record.current_version = Some(history_id);
            if let Err(e) = ledger
                .record_outcome(app, history_id, HistoryOutcome::Success)
                .await
            {
                warn!(app = %app, history_id, error = %e, "failed to record history outcome");
            }
        }

        Ok(self.finish(record, kind, Some(history_id), result).await)
    }

    async fn finish(
        &self,
        mut record: DeploymentRecord,
        kind: RollbackKind,
        history_id: Option<u64>,
        result: Result<(), String>,
    ) -> RollbackOutcome {
        let (success, status, reason) = match result {
            Ok(()) => (true, DeploymentStatus::RolledBack, "success".to_string()),
            Err(reason) => (false, DeploymentStatus::RollbackFailed, reason),
        };

        if let Err(e) = record.transition(status, reason.clone()) {
            warn!(app = %record.app, error = %e, "unexpected record state");
        }
        save_best_effort(&DeploymentLedger::new(self.store), &record).await;

        if success {
            info!(app = %record.app, history_id, kind = kind.label(), "rollback succeeded");
        } else {
            error!(app = %record.app, kind = kind.label(), reason = %reason, "rollback failed");
        }

        let revision = match history_id {
            Some(id) => self.revision_of(&record.app, id).await,
            None => None,
        };

        let mut notification = Notification::new(
            NotificationKind::rollback(kind, success),
            record.app.clone(),
            if success { String::new() } else { reason.clone() },
        );
        if let Some(id) = history_id {
            notification = notification.with_history_id(id);
        }
        if let Some(revision) = revision {
            notification = notification.with_revision(revision);
        }

        Reporter::new(self.backend, self.agent, self.report.clone())
            .conclude(&notification)
            .await;

        RollbackOutcome {
            success,
            kind,
            history_id,
            reason,
            record,
        }
    }

    async fn live_version(&self, app: &str) -> Option<u64> {
        match self.backend.history(app).await {
            Ok(window) => window.latest().map(|e| e.id),
            Err(e) => {
                warn!(app = %app, error = %e, "could not read history");
                None
            }
        }
    }

    async fn revision_of(&self, app: &str, history_id: u64) -> Option<String> {
        let window = self.backend.history(app).await.ok()?;
        window
            .entries()
            .iter()
            .find(|e| e.id == history_id)
            .map(|e| e.revision.clone())
    }
}

pub(crate) async fn save_best_effort(ledger: &DeploymentLedger<'_>, record: &DeploymentRecord) {
    if let Err(e) = ledger.save_record(record).await {
        warn!(app = %record.app, error = %e, "failed to persist deployment record");
    }
}
