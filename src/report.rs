//! Terminal outcome reporting.
//!
//! Every terminal outcome leaves a log artifact and an annotation behind.
//! None of it can change the outcome: failures here are warnings.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::notify::{Notification, Notifier};
use crate::store::current_unix_time;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_LOG_LINES: u32 = 1000;

#[derive(Debug, Clone)]
pub struct ReportSettings {
    /// Fetch controller application logs into the run log.
    pub collect_logs: bool,
    /// Upload the run log as a build artifact.
    pub upload_artifacts: bool,
    pub log_lines: u32,
    /// Directory the run log is written to.
    pub work_dir: PathBuf,
    pub slack_channel: Option<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            collect_logs: true,
            upload_artifacts: true,
            log_lines: DEFAULT_LOG_LINES,
            work_dir: std::env::temp_dir(),
            slack_channel: None,
        }
    }
}

pub struct Reporter<'a, B: ArgoBackend, A: PipelineAgent> {
    backend: &'a B,
    agent: &'a A,
    settings: ReportSettings,
}

impl<'a, B: ArgoBackend, A: PipelineAgent> Reporter<'a, B, A> {
    pub fn new(backend: &'a B, agent: &'a A, settings: ReportSettings) -> Self {
        Self {
            backend,
            agent,
            settings,
        }
    }

    /// Write and upload the run log, then notify. Returns the log path if
    /// one was written.
    pub async fn conclude(&self, notification: &Notification) -> Option<PathBuf> {
        let controller_logs = if self.settings.collect_logs {
            match self
                .backend
                .logs(&notification.app, self.settings.log_lines)
                .await
            {
                Ok(logs) => Some(logs),
                Err(e) => {
                    warn!(app = %notification.app, error = %e, "failed to collect application logs");
                    None
                }
            }
        } else {
            None
        };

        let log_path = match self
            .write_run_log(notification, controller_logs.as_deref())
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(app = %notification.app, error = %e, "failed to write run log");
                None
            }
        };

        if self.settings.upload_artifacts {
            if let Some(path) = &log_path {
                if let Err(e) = self.agent.upload_artifact(path).await {
                    warn!(path = %path.display(), error = %e, "failed to upload run log");
                }
            }
        }

        Notifier::new(self.agent, self.settings.slack_channel.clone())
            .notify(notification)
            .await;

        log_path
    }

    async fn write_run_log(
        &self,
        notification: &Notification,
        controller_logs: Option<&str>,
    ) -> std::io::Result<PathBuf> {
        let timestamp = current_unix_time();
        let path = run_log_path(&self.settings.work_dir, &notification.app, timestamp);

        let mut content = String::new();
        content.push_str(&format!("application: {}\n", notification.app));
        content.push_str(&format!("outcome:     {}\n", notification.kind.as_str()));
        if !notification.detail.is_empty() {
            content.push_str(&format!("detail:      {}\n", notification.detail));
        }
        if let Some(id) = notification.history_id {
            content.push_str(&format!("history id:  {}\n", id));
        }
        if let Some(revision) = &notification.revision {
            content.push_str(&format!("revision:    {}\n", revision));
        }
        content.push_str(&format!("timestamp:   {}\n", timestamp));

        if let Some(logs) = controller_logs {
            content.push_str("\n--- application logs ---\n");
            content.push_str(logs);
            if !logs.ends_with('\n') {
                content.push('\n');
            }
        }

        tokio::fs::create_dir_all(&self.settings.work_dir).await?;
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "run log written");
        Ok(path)
    }
}

fn run_log_path(dir: &Path, app: &str, timestamp: u64) -> PathBuf {
    let safe: String = app
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    dir.join(format!("argocd-deploy-{}-{}.log", safe, timestamp))
}
