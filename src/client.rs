//! Default client implementations over the `argocd` and `buildkite-agent`
//! binaries.
//!
//! This module provides:
//! - [`ArgoCdCli`]: [`ArgoBackend`] by shelling out to `argocd`
//! - [`BuildkiteAgentCli`]: [`PipelineAgent`] and [`MetadataStore`] by
//!   shelling out to `buildkite-agent`
//!
//! # Quick Start
//!
//! ```ignore
//! use argocd_deploy_rs::{ArgoCdCli, BuildkiteAgentCli, DeploymentState, DeploymentWorkflow};
//!
//! let argo = ArgoCdCli::new(config.credentials()?);
//! let agent = BuildkiteAgentCli::new();
//! argo.login().await?;
//!
//! let workflow = DeploymentWorkflow::new(&argo, &agent, &agent, Default::default());
//! let mut state = DeploymentState::new("my-app");
//! workflow.run_to_completion(&mut state).await?;
//! ```

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::config::Credentials;
use crate::error::DeployError;
use crate::history::{decode_app, parse_history, AppView};
use crate::store::{current_unix_time, MetadataStore};
use crate::types::{AnnotationStyle, HistoryWindow, SyncPolicy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

const REDACTED: &str = "[REDACTED]";

/// Run `binary args..`, returning stdout. `shown` is what errors and
/// logs show for the command line.
async fn run_command(binary: &str, args: &[String], shown: String) -> Result<String, DeployError> {
    debug!(command = %shown, "running");

    let output = Command::new(binary)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DeployError::Connectivity(format!("failed to run {}: {}", binary, e)))?;

    if !output.status.success() {
        return Err(DeployError::operation(
            shown,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════
// ARGO CD
// ═══════════════════════════════════════════════════════════════════

/// Argo CD controller reached through the `argocd` CLI.
pub struct ArgoCdCli {
    binary: String,
    credentials: Credentials,
}

impl ArgoCdCli {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            binary: "argocd".to_string(),
            credentials,
        }
    }

    /// Use a different `argocd` executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Command line as shown in logs and errors, password redacted.
    fn display(&self, args: &[String]) -> String {
        let mut shown = vec![self.binary.clone()];
        shown.extend(args.iter().map(|a| {
            if !self.credentials.password.is_empty() && a.contains(&self.credentials.password) {
                a.replace(&self.credentials.password, REDACTED)
            } else {
                a.clone()
            }
        }));
        shown.join(" ")
    }

    async fn argocd(&self, args: Vec<String>) -> Result<String, DeployError> {
        let shown = self.display(&args);
        run_command(&self.binary, &args, shown).await
    }

    fn login_args(&self) -> Vec<String> {
        to_args(&[
            "login",
            &self.credentials.server,
            "--username",
            &self.credentials.username,
            "--password",
            &self.credentials.password,
        ])
    }
}

impl ArgoBackend for ArgoCdCli {
    async fn login(&self) -> Result<(), DeployError> {
        match self.argocd(self.login_args()).await {
            Ok(_) => {
                debug!(server = %self.credentials.server, "logged in");
                Ok(())
            }
            Err(DeployError::Operation { stderr, .. }) => Err(DeployError::Connectivity(format!(
                "login to {} failed: {}",
                self.credentials.server, stderr
            ))),
            Err(e) => Err(e),
        }
    }

    async fn get_app(&self, app: &str) -> Result<AppView, DeployError> {
        let out = self
            .argocd(to_args(&["app", "get", app, "--output", "json"]))
            .await?;
        decode_app(&out)
    }

    async fn history(&self, app: &str) -> Result<HistoryWindow, DeployError> {
        let out = self.argocd(to_args(&["app", "history", app])).await?;
        parse_history(&out)
    }

    async fn logs(&self, app: &str, lines: u32) -> Result<String, DeployError> {
        self.argocd(to_args(&["app", "logs", app, "--tail", &lines.to_string()]))
            .await
    }

    async fn sync(&self, app: &str, timeout_secs: u64) -> Result<(), DeployError> {
        self.argocd(to_args(&["app", "sync", app, "--timeout", &timeout_secs.to_string()]))
            .await?;
        Ok(())
    }

    async fn rollback(&self, app: &str, history_id: u64, timeout_secs: u64) -> Result<(), DeployError> {
        self.argocd(to_args(&[
            "app",
            "rollback",
            app,
            &history_id.to_string(),
            "--timeout",
            &timeout_secs.to_string(),
        ]))
        .await?;
        Ok(())
    }

    async fn wait_healthy(&self, app: &str, timeout_secs: u64) -> Result<(), DeployError> {
        self.argocd(to_args(&[
            "app",
            "wait",
            app,
            "--health",
            "--timeout",
            &timeout_secs.to_string(),
        ]))
        .await?;
        Ok(())
    }

    async fn set_sync_policy(&self, app: &str, policy: SyncPolicy) -> Result<(), DeployError> {
        self.argocd(to_args(&["app", "set", app, "--sync-policy", policy.as_arg()]))
            .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// BUILDKITE AGENT
// ═══════════════════════════════════════════════════════════════════

/// CI runtime reached through the `buildkite-agent` CLI. Also the
/// cross-step metadata store.
pub struct BuildkiteAgentCli {
    binary: String,
    /// Where injected pipeline documents are written before upload.
    scratch_dir: PathBuf,
}

impl Default for BuildkiteAgentCli {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildkiteAgentCli {
    pub fn new() -> Self {
        Self {
            binary: "buildkite-agent".to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Use a different `buildkite-agent` executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    async fn agent(&self, args: Vec<String>) -> Result<String, DeployError> {
        let shown = format!("{} {}", self.binary, args.join(" "));
        run_command(&self.binary, &args, shown).await
    }
}

impl PipelineAgent for BuildkiteAgentCli {
    async fn annotate(&self, body: &str, style: AnnotationStyle, context: &str) -> Result<(), DeployError> {
        self.agent(to_args(&[
            "annotate",
            body,
            "--style",
            style.as_arg(),
            "--context",
            context,
        ]))
        .await?;
        Ok(())
    }

    async fn upload_artifact(&self, path: &Path) -> Result<(), DeployError> {
        let path = path.display().to_string();
        self.agent(to_args(&["artifact", "upload", &path])).await?;
        Ok(())
    }

    async fn upload_pipeline(&self, document: &str) -> Result<(), DeployError> {
        let file = self.scratch_dir.join(format!(
            "argocd-deploy-pipeline-{}-{}.yml",
            std::process::id(),
            current_unix_time()
        ));
        tokio::fs::write(&file, document)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to write pipeline file: {}", e)))?;

        let path = file.display().to_string();
        let result = self.agent(to_args(&["pipeline", "upload", &path])).await;

        if let Err(e) = tokio::fs::remove_file(&file).await {
            warn!(path = %path, error = %e, "failed to remove pipeline file");
        }
        result.map(|_| ())
    }
}

#[async_trait]
impl MetadataStore for BuildkiteAgentCli {
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError> {
        let out = self
            .agent(to_args(&["meta-data", "get", key, "--default", ""]))
            .await
            .map_err(|e| DeployError::Storage(e.to_string()))?;
        let value = out.trim_end_matches(['\n', '\r']);
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(value.to_string()))
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeployError> {
        self.agent(to_args(&["meta-data", "set", key, value]))
            .await
            .map_err(|e| DeployError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            server: "argocd.example.com".into(),
            username: "ci".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_login_display_redacts_password() {
        let cli = ArgoCdCli::new(credentials());
        let args = cli.login_args();
        assert!(args.contains(&"hunter2".to_string()));

        let shown = cli.display(&args);
        assert_eq!(
            shown,
            "argocd login argocd.example.com --username ci --password [REDACTED]"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_connectivity_error() {
        let cli = ArgoCdCli::new(credentials()).with_binary("/nonexistent/argocd-deploy-test");
        let err = cli.history("web").await.unwrap_err();
        assert!(matches!(err, DeployError::Connectivity(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_login_is_connectivity_error() {
        let cli = ArgoCdCli::new(credentials()).with_binary("false");
        let err = cli.login().await.unwrap_err();
        assert!(matches!(err, DeployError::Connectivity(_)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_operation_error() {
        let cli = ArgoCdCli::new(credentials()).with_binary("false");
        let err = cli.sync("web", 60).await.unwrap_err();
        match err {
            DeployError::Operation { command, code, .. } => {
                assert_eq!(command, "false app sync web --timeout 60");
                assert_eq!(code, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_metadata_reads_as_absent() {
        // `true` prints nothing, like `meta-data get --default ""` on a miss
        let agent = BuildkiteAgentCli::new().with_binary("true");
        assert!(agent.get("argocd-deploy:web:deployment").await.unwrap().is_none());
        agent.set("argocd-deploy/web/decision", "accept").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipeline_file_is_cleaned_up() {
        let dir = std::env::temp_dir().join(format!("argocd-deploy-client-{}", rand::random::<u32>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let agent = BuildkiteAgentCli::new().with_binary("true").with_scratch_dir(dir.clone());
        agent.upload_pipeline("steps: []\n").await.unwrap();

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
