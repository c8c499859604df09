//! Test doubles for the controller and CI agent seams.

use crate::agent::PipelineAgent;
use crate::backend::ArgoBackend;
use crate::error::DeployError;
use crate::history::AppView;
use crate::types::{AnnotationStyle, HealthStatus, HistoryEntry, HistoryWindow, SyncPolicy};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn window(rows: &[(u64, &str)]) -> HistoryWindow {
    HistoryWindow::new(
        rows.iter()
            .map(|(id, revision)| HistoryEntry {
                id: *id,
                revision: revision.to_string(),
                deployed_at: String::new(),
                position: 0,
            })
            .collect(),
    )
}

#[derive(Default)]
pub struct FakeArgo {
    pub health: Mutex<VecDeque<HealthStatus>>,
    pub last_health: Mutex<Option<HealthStatus>>,
    pub auto_sync: Mutex<bool>,
    pub history: Mutex<HistoryWindow>,
    /// Revision appended to history by a successful sync.
    pub sync_revision: Mutex<Option<String>>,
    pub fail_login: bool,
    pub fail_get_app: bool,
    pub fail_sync: bool,
    pub fail_rollback: bool,
    pub fail_wait: bool,
    pub fail_set_policy: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeArgo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health(self, sequence: &[HealthStatus]) -> Self {
        *self.health.lock().unwrap() = sequence.iter().copied().collect();
        self
    }

    pub fn with_history(self, rows: &[(u64, &str)]) -> Self {
        *self.history.lock().unwrap() = window(rows);
        self
    }

    pub fn with_auto_sync(self, enabled: bool) -> Self {
        *self.auto_sync.lock().unwrap() = enabled;
        self
    }

    pub fn with_sync_revision(self, revision: &str) -> Self {
        *self.sync_revision.lock().unwrap() = Some(revision.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn auto_sync_enabled(&self) -> bool {
        *self.auto_sync.lock().unwrap()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fail(&self, command: &str) -> DeployError {
        DeployError::operation(command, Some(1), "scripted failure")
    }
}

impl ArgoBackend for FakeArgo {
    async fn login(&self) -> Result<(), DeployError> {
        self.log("login".into());
        if self.fail_login {
            return Err(DeployError::Connectivity("scripted login failure".into()));
        }
        Ok(())
    }

    async fn get_app(&self, app: &str) -> Result<AppView, DeployError> {
        self.log(format!("get {}", app));
        if self.fail_get_app {
            return Err(self.fail("argocd app get"));
        }
        let next = self.health.lock().unwrap().pop_front();
        let health = match next {
            Some(h) => {
                *self.last_health.lock().unwrap() = Some(h);
                h
            }
            None => self.last_health.lock().unwrap().unwrap_or(HealthStatus::Unknown),
        };
        Ok(AppView {
            health,
            auto_sync: self.auto_sync_enabled(),
        })
    }

    async fn history(&self, app: &str) -> Result<HistoryWindow, DeployError> {
        self.log(format!("history {}", app));
        Ok(self.history.lock().unwrap().clone())
    }

    async fn logs(&self, app: &str, lines: u32) -> Result<String, DeployError> {
        self.log(format!("logs {} {}", app, lines));
        Ok("pod/web-1 started\n".to_string())
    }

    async fn sync(&self, app: &str, timeout_secs: u64) -> Result<(), DeployError> {
        self.log(format!("sync {} {}", app, timeout_secs));
        if self.fail_sync {
            return Err(self.fail("argocd app sync"));
        }
        if let Some(revision) = self.sync_revision.lock().unwrap().clone() {
            let mut history = self.history.lock().unwrap();
            let next_id = history.latest().map(|e| e.id + 1).unwrap_or(0);
            let mut entries = history.entries().to_vec();
            entries.push(HistoryEntry {
                id: next_id,
                revision,
                deployed_at: String::new(),
                position: 0,
            });
            *history = HistoryWindow::new(entries);
        }
        Ok(())
    }

    async fn rollback(&self, app: &str, history_id: u64, timeout_secs: u64) -> Result<(), DeployError> {
        self.log(format!("rollback {} {} {}", app, history_id, timeout_secs));
        if self.fail_rollback {
            return Err(self.fail("argocd app rollback"));
        }
        Ok(())
    }

    async fn wait_healthy(&self, app: &str, timeout_secs: u64) -> Result<(), DeployError> {
        self.log(format!("wait {} {}", app, timeout_secs));
        if self.fail_wait {
            return Err(self.fail("argocd app wait"));
        }
        Ok(())
    }

    async fn set_sync_policy(&self, app: &str, policy: SyncPolicy) -> Result<(), DeployError> {
        self.log(format!("set {} {}", app, policy.as_arg()));
        if self.fail_set_policy {
            return Err(self.fail("argocd app set"));
        }
        *self.auto_sync.lock().unwrap() = policy == SyncPolicy::Automated;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAgent {
    pub annotations: Mutex<Vec<(String, AnnotationStyle, String)>>,
    pub artifacts: Mutex<Vec<PathBuf>>,
    pub pipelines: Mutex<Vec<String>>,
    pub fail_all: bool,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn annotations(&self) -> Vec<(String, AnnotationStyle, String)> {
        self.annotations.lock().unwrap().clone()
    }

    pub fn pipelines(&self) -> Vec<String> {
        self.pipelines.lock().unwrap().clone()
    }

    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.lock().unwrap().clone()
    }

    fn check(&self, command: &str) -> Result<(), DeployError> {
        if self.fail_all {
            return Err(DeployError::operation(command, Some(1), "agent unavailable"));
        }
        Ok(())
    }
}

impl PipelineAgent for FakeAgent {
    async fn annotate(&self, body: &str, style: AnnotationStyle, context: &str) -> Result<(), DeployError> {
        self.check("buildkite-agent annotate")?;
        self.annotations
            .lock()
            .unwrap()
            .push((body.to_string(), style, context.to_string()));
        Ok(())
    }

    async fn upload_artifact(&self, path: &Path) -> Result<(), DeployError> {
        self.check("buildkite-agent artifact upload")?;
        self.artifacts.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn upload_pipeline(&self, document: &str) -> Result<(), DeployError> {
        self.check("buildkite-agent pipeline upload")?;
        self.pipelines.lock().unwrap().push(document.to_string());
        Ok(())
    }
}
