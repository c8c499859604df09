//! Notifications for terminal outcomes.
//!
//! Every outcome becomes a build annotation; when a Slack channel is
//! configured it is also sent as a notify-only pipeline step. Delivery is
//! best-effort throughout.

use crate::agent::PipelineAgent;
use crate::error::DeployError;
use crate::types::{AnnotationStyle, RollbackKind};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DeploySuccess,
    DeployFailed,
    RollbackSuccessAuto,
    RollbackSuccessManual,
    RollbackFailedAuto,
    RollbackFailedManual,
    ManualDecisionRequired,
    FailureAccepted,
}

impl NotificationKind {
    /// The four rollback outcomes, keyed by kind and success.
    pub fn rollback(kind: RollbackKind, success: bool) -> Self {
        match (kind, success) {
            (RollbackKind::Automatic, true) => NotificationKind::RollbackSuccessAuto,
            (RollbackKind::Explicit, true) => NotificationKind::RollbackSuccessManual,
            (RollbackKind::Automatic, false) => NotificationKind::RollbackFailedAuto,
            (RollbackKind::Explicit, false) => NotificationKind::RollbackFailedManual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DeploySuccess => "deploy_success",
            NotificationKind::DeployFailed => "deploy_failed",
            NotificationKind::RollbackSuccessAuto => "rollback_success_auto",
            NotificationKind::RollbackSuccessManual => "rollback_success_manual",
            NotificationKind::RollbackFailedAuto => "rollback_failed_auto",
            NotificationKind::RollbackFailedManual => "rollback_failed_manual",
            NotificationKind::ManualDecisionRequired => "manual_decision_required",
            NotificationKind::FailureAccepted => "failure_accepted",
        }
    }

    pub fn style(&self) -> AnnotationStyle {
        match self {
            NotificationKind::DeploySuccess
            | NotificationKind::RollbackSuccessAuto
            | NotificationKind::RollbackSuccessManual => AnnotationStyle::Success,
            NotificationKind::DeployFailed
            | NotificationKind::RollbackFailedAuto
            | NotificationKind::RollbackFailedManual => AnnotationStyle::Error,
            NotificationKind::ManualDecisionRequired => AnnotationStyle::Warning,
            NotificationKind::FailureAccepted => AnnotationStyle::Info,
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            NotificationKind::DeploySuccess => "Deployment succeeded",
            NotificationKind::DeployFailed => "Deployment failed",
            NotificationKind::RollbackSuccessAuto => "Automatic rollback succeeded",
            NotificationKind::RollbackSuccessManual => "Manual rollback succeeded",
            NotificationKind::RollbackFailedAuto => "Automatic rollback failed",
            NotificationKind::RollbackFailedManual => "Manual rollback failed",
            NotificationKind::ManualDecisionRequired => "Deployment failed, decision required",
            NotificationKind::FailureAccepted => "Deployment failure accepted",
        }
    }

    fn emoji(&self) -> &'static str {
        match self.style() {
            AnnotationStyle::Success => ":white_check_mark:",
            AnnotationStyle::Error => ":x:",
            AnnotationStyle::Warning => ":warning:",
            AnnotationStyle::Info => ":information_source:",
        }
    }
}

/// One outcome worth telling people about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub app: String,
    pub detail: String,
    pub history_id: Option<u64>,
    pub revision: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, app: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            app: app.into(),
            detail: detail.into(),
            history_id: None,
            revision: None,
        }
    }

    pub fn with_history_id(mut self, history_id: u64) -> Self {
        self.history_id = Some(history_id);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        let revision = revision.into();
        if !revision.is_empty() {
            self.revision = Some(revision);
        }
        self
    }

    pub fn title(&self) -> String {
        format!("{} {}: `{}`", self.kind.emoji(), self.kind.headline(), self.app)
    }

    /// Markdown body for the build annotation.
    pub fn annotation_body(&self) -> String {
        let mut body = format!("### {}\n\n", self.title());
        if !self.detail.is_empty() {
            body.push_str(&format!("{}\n\n", self.detail));
        }
        if let Some(id) = self.history_id {
            body.push_str(&format!("- History ID: `{}`\n", id));
        }
        if let Some(revision) = &self.revision {
            body.push_str(&format!("- Revision: `{}`\n", revision));
        }
        body
    }

    /// Plain text for chat.
    pub fn message(&self) -> String {
        let mut message = format!("{} {}: {}", self.kind.emoji(), self.kind.headline(), self.app);
        if let Some(id) = self.history_id {
            message.push_str(&format!(" (history {})", id));
        }
        if !self.detail.is_empty() {
            message.push_str(&format!(" - {}", self.detail));
        }
        message
    }
}

/// Annotation context for `app`; one annotation per application.
pub fn annotation_context(app: &str) -> String {
    format!("argocd-deploy-{}", app)
}

#[derive(Serialize)]
struct NotifyPipeline {
    steps: Vec<NotifyStep>,
}

#[derive(Serialize)]
struct NotifyStep {
    label: String,
    command: String,
    notify: Vec<SlackNotify>,
}

#[derive(Serialize)]
struct SlackNotify {
    slack: SlackTarget,
}

#[derive(Serialize)]
struct SlackTarget {
    channels: Vec<String>,
    message: String,
}

/// Pipeline YAML for a step that only exists to send a Slack message.
pub fn slack_notify_pipeline(channel: &str, notification: &Notification) -> Result<String, DeployError> {
    let pipeline = NotifyPipeline {
        steps: vec![NotifyStep {
            label: format!(":slack: {} ({})", notification.kind.as_str(), notification.app),
            command: "true".to_string(),
            notify: vec![SlackNotify {
                slack: SlackTarget {
                    channels: vec![channel.to_string()],
                    message: notification.message(),
                },
            }],
        }],
    };
    serde_yaml::to_string(&pipeline)
        .map_err(|e| DeployError::Configuration(format!("failed to render notify step: {}", e)))
}

/// Delivers notifications through the CI agent.
pub struct Notifier<'a, A: PipelineAgent> {
    agent: &'a A,
    slack_channel: Option<String>,
}

impl<'a, A: PipelineAgent> Notifier<'a, A> {
    pub fn new(agent: &'a A, slack_channel: Option<String>) -> Self {
        Self {
            agent,
            slack_channel: slack_channel.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Annotate and, if configured, message Slack. Never fails.
    pub async fn notify(&self, notification: &Notification) {
        info!(app = %notification.app, kind = notification.kind.as_str(), "notifying");

        if let Err(e) = self
            .agent
            .annotate(
                &notification.annotation_body(),
                notification.kind.style(),
                &annotation_context(&notification.app),
            )
            .await
        {
            warn!(app = %notification.app, error = %e, "failed to post annotation");
        }

        let Some(channel) = &self.slack_channel else {
            return;
        };

        let document = match slack_notify_pipeline(channel, notification) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "failed to render slack notification");
                return;
            }
        };
        if let Err(e) = self.agent.upload_pipeline(&document).await {
            warn!(app = %notification.app, error = %e, "failed to send slack notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAgent;

    #[test]
    fn test_rollback_kinds() {
        assert_eq!(
            NotificationKind::rollback(RollbackKind::Automatic, true).as_str(),
            "rollback_success_auto"
        );
        assert_eq!(
            NotificationKind::rollback(RollbackKind::Explicit, true).as_str(),
            "rollback_success_manual"
        );
        assert_eq!(
            NotificationKind::rollback(RollbackKind::Automatic, false).as_str(),
            "rollback_failed_auto"
        );
        assert_eq!(
            NotificationKind::rollback(RollbackKind::Explicit, false).as_str(),
            "rollback_failed_manual"
        );
    }

    #[test]
    fn test_annotation_body() {
        let n = Notification::new(NotificationKind::RollbackSuccessAuto, "web", "health_degraded")
            .with_history_id(7)
            .with_revision("4f1c2a9");
        let body = n.annotation_body();
        assert!(body.contains("Automatic rollback succeeded"));
        assert!(body.contains("`web`"));
        assert!(body.contains("health_degraded"));
        assert!(body.contains("History ID: `7`"));
        assert!(body.contains("Revision: `4f1c2a9`"));
        assert_eq!(n.kind.style(), AnnotationStyle::Success);
    }

    #[test]
    fn test_slack_pipeline_yaml() {
        let n = Notification::new(NotificationKind::DeployFailed, "web", "sync_failed");
        let yaml = slack_notify_pipeline("#deploys", &n).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let step = &parsed["steps"][0];
        assert_eq!(step["command"], "true");
        assert_eq!(step["notify"][0]["slack"]["channels"][0], "#deploys");
        assert!(step["notify"][0]["slack"]["message"]
            .as_str()
            .unwrap()
            .contains("sync_failed"));
    }

    #[tokio::test]
    async fn test_notifier_delivers() {
        let agent = FakeAgent::new();
        let notifier = Notifier::new(&agent, Some("#deploys".into()));
        notifier
            .notify(&Notification::new(NotificationKind::DeploySuccess, "web", ""))
            .await;

        let annotations = agent.annotations();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].1, AnnotationStyle::Success);
        assert_eq!(annotations[0].2, "argocd-deploy-web");
        assert_eq!(agent.pipelines().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_without_slack_or_agent() {
        let agent = FakeAgent::new();
        Notifier::new(&agent, Some("  ".into()))
            .notify(&Notification::new(NotificationKind::DeploySuccess, "web", ""))
            .await;
        assert!(agent.pipelines().is_empty());

        // Agent failures are swallowed
        let broken = FakeAgent::failing();
        Notifier::new(&broken, Some("#deploys".into()))
            .notify(&Notification::new(NotificationKind::DeployFailed, "web", ""))
            .await;
    }
}
