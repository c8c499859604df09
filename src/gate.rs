//! Manual Decision Gate
//!
//! In manual rollback mode a failed deploy is handed to a human. The
//! follow-up step runs later, in another process, with nothing but the CI
//! agent and its environment. So the gate resolves everything it will
//! need now and freezes it into a [`DecisionPayload`] carried by the
//! injected step.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::error::DeployError;
use crate::notify::{Notification, NotificationKind};
use crate::report::{ReportSettings, Reporter};
use crate::resolver::Resolution;
use crate::rollback::{RollbackOrchestrator, RollbackOutcome};
use crate::store::{
    current_unix_time, decision_key, key_safe, DeploymentLedger, DeploymentRecord, DeploymentStatus,
    MetadataStore,
};
use crate::types::RollbackKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Environment variable the follow-up step reads its payload from.
pub const PAYLOAD_ENV: &str = "ARGOCD_DEPLOY_DECISION_PAYLOAD";

/// Command the follow-up step runs.
pub const RESUME_COMMAND: &str = "argocd-deploy resume";

/// Everything the continuation needs, resolved before the pause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub app: String,
    pub target_revision: String,
    pub history_id: u64,
    /// Operation timeout for the rollback and health wait.
    pub timeout_secs: u64,
    /// Unix seconds when the gate opened.
    pub created_at: u64,
    /// Metadata key the block step stores the choice under.
    pub decision_key: String,
    /// Why the deploy failed.
    #[serde(default)]
    pub reason: String,
}

impl DecisionPayload {
    pub fn new(app: &str, target: &Resolution, timeout_secs: u64, reason: &str) -> Self {
        Self {
            app: app.to_string(),
            target_revision: target.revision.clone(),
            history_id: target.history_id,
            timeout_secs,
            created_at: current_unix_time(),
            decision_key: decision_key(app),
            reason: reason.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, DeployError> {
        serde_json::to_string(self).map_err(|e| DeployError::Decode(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, DeployError> {
        serde_json::from_str(raw.trim())
            .map_err(|e| DeployError::Configuration(format!("invalid decision payload: {}", e)))
    }
}

/// The two choices offered to the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Rollback,
    Accept,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Rollback => "rollback",
            Decision::Accept => "accept",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        match raw.trim() {
            "rollback" => Ok(Decision::Rollback),
            "accept" => Ok(Decision::Accept),
            other => Err(DeployError::Configuration(format!(
                "unrecognised decision {:?}, expected rollback or accept",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// PIPELINE DOCUMENT
// ═══════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct DecisionPipeline {
    steps: Vec<PipelineStep>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PipelineStep {
    Block(BlockStep),
    Command(CommandStep),
}

#[derive(Serialize)]
struct BlockStep {
    block: String,
    key: String,
    prompt: String,
    fields: Vec<SelectField>,
}

#[derive(Serialize)]
struct SelectField {
    select: String,
    key: String,
    required: bool,
    options: Vec<SelectOption>,
}

#[derive(Serialize)]
struct SelectOption {
    label: String,
    value: String,
}

#[derive(Serialize)]
struct CommandStep {
    label: String,
    key: String,
    depends_on: String,
    command: String,
    env: BTreeMap<String, String>,
}

fn block_key(app: &str) -> String {
    format!("argocd-deploy-decision-{}", key_safe(app))
}

/// Render the two-step continuation: a block step with exactly the
/// `rollback` / `accept` choice, and a step depending on it that runs
/// [`RESUME_COMMAND`] with the payload in [`PAYLOAD_ENV`].
///
/// `resume_env` is passed through to the follow-up step so it can
/// re-authenticate. It must not carry secrets.
pub fn decision_pipeline(
    payload: &DecisionPayload,
    resume_env: &BTreeMap<String, String>,
) -> Result<String, DeployError> {
    let block = block_key(&payload.app);

    let mut env = resume_env.clone();
    env.insert(PAYLOAD_ENV.to_string(), payload.to_json()?);

    let pipeline = DecisionPipeline {
        steps: vec![
            PipelineStep::Block(BlockStep {
                block: format!(":rotating_light: Deployment of {} failed", payload.app),
                key: block.clone(),
                prompt: format!(
                    "Roll {} back to history {} ({}) or accept the failure?",
                    payload.app, payload.history_id, payload.target_revision
                ),
                fields: vec![SelectField {
                    select: "Decision".to_string(),
                    key: payload.decision_key.clone(),
                    required: true,
                    options: vec![
                        SelectOption {
                            label: format!("Roll back to history {}", payload.history_id),
                            value: Decision::Rollback.as_str().to_string(),
                        },
                        SelectOption {
                            label: "Accept the failure".to_string(),
                            value: Decision::Accept.as_str().to_string(),
                        },
                    ],
                }],
            }),
            PipelineStep::Command(CommandStep {
                label: format!(":arrows_counterclockwise: Apply decision for {}", payload.app),
                key: format!("{}-apply", block),
                depends_on: block,
                command: RESUME_COMMAND.to_string(),
                env,
            }),
        ],
    };

    serde_yaml::to_string(&pipeline)
        .map_err(|e| DeployError::Configuration(format!("failed to render decision step: {}", e)))
}

// ═══════════════════════════════════════════════════════════════════
// GATE
// ═══════════════════════════════════════════════════════════════════

pub struct ManualDecisionGate<'a, A: PipelineAgent> {
    agent: &'a A,
    resume_env: BTreeMap<String, String>,
}

impl<'a, A: PipelineAgent> ManualDecisionGate<'a, A> {
    pub fn new(agent: &'a A, resume_env: BTreeMap<String, String>) -> Self {
        Self { agent, resume_env }
    }

    /// Inject the decision step for `app`.
    ///
    /// Refuses with `NotFound` and injects nothing when no rollback target
    /// was resolved.
    pub async fn open(
        &self,
        app: &str,
        target: Option<&Resolution>,
        timeout_secs: u64,
        reason: &str,
    ) -> Result<DecisionPayload, DeployError> {
        let Some(target) = target else {
            warn!(app = %app, "no rollback target resolved, not offering a decision");
            return Err(DeployError::NotFound(format!(
                "no rollback target resolvable for {}",
                app
            )));
        };

        let payload = DecisionPayload::new(app, target, timeout_secs, reason);
        let document = decision_pipeline(&payload, &self.resume_env)?;
        self.agent.upload_pipeline(&document).await?;

        info!(
            app = %app,
            history_id = payload.history_id,
            revision = %payload.target_revision,
            "decision step injected"
        );
        Ok(payload)
    }
}

// ═══════════════════════════════════════════════════════════════════
// CONTINUATION
// ═══════════════════════════════════════════════════════════════════

/// What the follow-up step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationOutcome {
    RolledBack(RollbackOutcome),
    Accepted,
}

impl ContinuationOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            ContinuationOutcome::RolledBack(outcome) => outcome.success,
            ContinuationOutcome::Accepted => true,
        }
    }
}

/// Executes the human's decision from a [`DecisionPayload`].
pub struct Continuation<'a, B: ArgoBackend, A: PipelineAgent> {
    backend: &'a B,
    agent: &'a A,
    store: &'a dyn MetadataStore,
    report: ReportSettings,
}

impl<'a, B: ArgoBackend, A: PipelineAgent> Continuation<'a, B, A> {
    pub fn new(
        backend: &'a B,
        agent: &'a A,
        store: &'a dyn MetadataStore,
        report: ReportSettings,
    ) -> Self {
        Self {
            backend,
            agent,
            store,
            report,
        }
    }

    /// Read and apply the recorded decision.
    pub async fn execute(&self, payload: &DecisionPayload) -> Result<ContinuationOutcome, DeployError> {
        let decision = self.decision(payload).await?;
        self.apply(payload, decision).await
    }

    /// The choice recorded by the block step. Missing or anything other
    /// than `rollback` / `accept` is a configuration error.
    pub async fn decision(&self, payload: &DecisionPayload) -> Result<Decision, DeployError> {
        let raw = self
            .store
            .get(&payload.decision_key)
            .await?
            .ok_or_else(|| {
                DeployError::Configuration(format!(
                    "no decision recorded under {}",
                    payload.decision_key
                ))
            })?;
        Decision::parse(&raw)
    }

    /// Carry out `decision`. Only a rollback reaches the controller.
    pub async fn apply(
        &self,
        payload: &DecisionPayload,
        decision: Decision,
    ) -> Result<ContinuationOutcome, DeployError> {
        info!(app = %payload.app, decision = decision.as_str(), "applying decision");

        match decision {
            Decision::Rollback => {
                self.backend.login().await?;
                // The target was resolved by the orchestrator, not picked by
                // hand, so this is an automatic rollback that waits for health.
                let outcome = RollbackOrchestrator::new(
                    self.backend,
                    self.agent,
                    self.store,
                    payload.timeout_secs,
                    self.report.clone(),
                )
                .rollback(
                    &payload.app,
                    &payload.history_id.to_string(),
                    RollbackKind::Automatic,
                )
                .await?;
                Ok(ContinuationOutcome::RolledBack(outcome))
            }
            Decision::Accept => {
                self.accept(payload).await;
                Ok(ContinuationOutcome::Accepted)
            }
        }
    }

    async fn accept(&self, payload: &DecisionPayload) {
        let ledger = DeploymentLedger::new(self.store);
        let mut record = match ledger.load_record(&payload.app).await {
            Ok(Some(record)) => record,
            Ok(None) => failed_record(&payload.app),
            Err(e) => {
                warn!(app = %payload.app, error = %e, "could not load deployment record");
                failed_record(&payload.app)
            }
        };
        record.result = "failure accepted".to_string();
        record.timestamp = current_unix_time();
        if let Err(e) = ledger.save_record(&record).await {
            warn!(app = %payload.app, error = %e, "failed to persist deployment record");
        }

        info!(app = %payload.app, "failure accepted");
        let notification =
            Notification::new(NotificationKind::FailureAccepted, payload.app.clone(), payload.reason.clone());
        Reporter::new(self.backend, self.agent, self.report.clone())
            .conclude(&notification)
            .await;
    }
}

fn failed_record(app: &str) -> DeploymentRecord {
    let mut record = DeploymentRecord::deploying(app, None);
    record.status = DeploymentStatus::Failed;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionSource;
    use crate::store::MemoryMetadataStore;
    use crate::testing::{FakeAgent, FakeArgo};

    fn target() -> Resolution {
        Resolution {
            history_id: 7,
            revision: "bbb222".into(),
            source: ResolutionSource::Metadata,
        }
    }

    fn report() -> ReportSettings {
        ReportSettings {
            collect_logs: false,
            upload_artifacts: false,
            ..ReportSettings::default()
        }
    }

    fn payload() -> DecisionPayload {
        DecisionPayload::new("web", &target(), 240, "health_degraded")
    }

    #[test]
    fn test_payload_json() {
        let payload = payload();
        let json = payload.to_json().unwrap();
        assert!(json.contains("\"history_id\":7"));
        assert!(json.contains("argocd-deploy/web/decision"));
        assert_eq!(DecisionPayload::from_json(&json).unwrap(), payload);

        let err = DecisionPayload::from_json("{\"app\":").unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(Decision::parse("rollback\n").unwrap(), Decision::Rollback);
        assert_eq!(Decision::parse("accept").unwrap(), Decision::Accept);
        assert!(Decision::parse("retry").is_err());
        assert!(Decision::parse("").is_err());
    }

    #[test]
    fn test_decision_pipeline_document() {
        let mut env = BTreeMap::new();
        env.insert("BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_APP".to_string(), "web".to_string());

        let yaml = decision_pipeline(&payload(), &env).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let steps = doc["steps"].as_sequence().unwrap();
        assert_eq!(steps.len(), 2);

        let field = &steps[0]["fields"][0];
        assert_eq!(field["key"], "argocd-deploy/web/decision");
        let options = field["options"].as_sequence().unwrap();
        let values: Vec<&str> = options.iter().map(|o| o["value"].as_str().unwrap()).collect();
        assert_eq!(values, vec!["rollback", "accept"]);

        let follow_up = &steps[1];
        assert_eq!(follow_up["depends_on"], steps[0]["key"]);
        assert_eq!(follow_up["command"], RESUME_COMMAND);
        assert_eq!(follow_up["env"]["BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_APP"], "web");
        let embedded = follow_up["env"][PAYLOAD_ENV].as_str().unwrap();
        assert_eq!(DecisionPayload::from_json(embedded).unwrap().history_id, 7);
    }

    #[test]
    fn test_decision_pipeline_keys_use_allowed_characters() {
        let allowed = |key: &str| {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'))
        };

        for app in ["web", "team/web.app:prod", "payments api"] {
            let payload = DecisionPayload::new(app, &target(), 240, "health_degraded");
            let yaml = decision_pipeline(&payload, &BTreeMap::new()).unwrap();
            let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
            let steps = doc["steps"].as_sequence().unwrap();

            let field_key = steps[0]["fields"][0]["key"].as_str().unwrap();
            assert!(allowed(field_key), "field key {field_key:?} for {app:?}");
            assert_eq!(field_key, payload.decision_key);

            for step in steps {
                let key = step["key"].as_str().unwrap();
                assert!(allowed(key), "step key {key:?} for {app:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_gate_refuses_without_target() {
        let agent = FakeAgent::new();
        let gate = ManualDecisionGate::new(&agent, BTreeMap::new());

        let err = gate.open("web", None, 300, "health_degraded").await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
        assert!(agent.pipelines().is_empty());
    }

    #[tokio::test]
    async fn test_gate_injects_decision_step() {
        let agent = FakeAgent::new();
        let gate = ManualDecisionGate::new(&agent, BTreeMap::new());

        let payload = gate.open("web", Some(&target()), 300, "health_timeout").await.unwrap();
        assert_eq!(payload.history_id, 7);
        assert_eq!(payload.timeout_secs, 300);
        assert_eq!(agent.pipelines().len(), 1);
        assert!(agent.pipelines()[0].contains(RESUME_COMMAND));
    }

    #[tokio::test]
    async fn test_continuation_rollback() {
        let argo = FakeArgo::new()
            .with_history(&[(7, "bbb222"), (8, "ccc333")])
            .with_auto_sync(true);
        let agent = FakeAgent::new();
        let store = MemoryMetadataStore::new();
        store.set(&decision_key("web"), "rollback").await.unwrap();

        let outcome = Continuation::new(&argo, &agent, &store, report())
            .execute(&payload())
            .await
            .unwrap();

        assert!(outcome.is_success());
        let calls = argo.calls();
        assert_eq!(calls[0], "login");
        assert!(calls.contains(&"rollback web 7 240".to_string()));
        assert!(calls.contains(&"wait web 240".to_string()));
        assert!(argo.auto_sync_enabled());
    }

    #[tokio::test]
    async fn test_continuation_accept() {
        let argo = FakeArgo::new();
        let agent = FakeAgent::new();
        let store = MemoryMetadataStore::new();
        store.set(&decision_key("web"), "accept").await.unwrap();

        let outcome = Continuation::new(&argo, &agent, &store, report())
            .execute(&payload())
            .await
            .unwrap();

        assert_eq!(outcome, ContinuationOutcome::Accepted);
        assert!(argo.calls().is_empty());

        let record = DeploymentLedger::new(&store).load_record("web").await.unwrap().unwrap();
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert_eq!(record.result, "failure accepted");
        assert_eq!(agent.annotations()[0].1, crate::types::AnnotationStyle::Info);
    }

    #[tokio::test]
    async fn test_continuation_rejects_unknown_or_missing_decision() {
        let argo = FakeArgo::new();
        let agent = FakeAgent::new();
        let store = MemoryMetadataStore::new();
        let continuation = Continuation::new(&argo, &agent, &store, report());

        let err = continuation.execute(&payload()).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));

        store.set(&decision_key("web"), "maybe").await.unwrap();
        let err = continuation.execute(&payload()).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert!(argo.calls().is_empty());
    }
}
