//! Configuration surface of the CI step.
//!
//! Every option is a flag or the matching Buildkite plugin environment
//! variable (`BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_<NAME>`). Out-of-range
//! numbers fall back to their defaults with a warning; missing required
//! input is a [`DeployError::Configuration`] raised before any controller
//! call.

use crate::error::DeployError;
use crate::health::HealthCheckSettings;
use crate::report::{ReportSettings, DEFAULT_LOG_LINES};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

pub const ENV_PREFIX: &str = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_";

/// Fallback password source. Steps injected by the decision gate do not
/// get the plugin environment, so the agent (an environment hook or a
/// secrets plugin) provides the password here instead.
pub const PASSWORD_ENV: &str = "ARGOCD_PASSWORD";

pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300;
pub const MIN_OPERATION_TIMEOUT_SECS: u64 = 30;
pub const MAX_OPERATION_TIMEOUT_SECS: u64 = 3600;

pub const MIN_LOG_LINES: u32 = 100;
pub const MAX_LOG_LINES: u32 = 10_000;

/// What the step was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Deploy,
    Rollback,
}

/// Failure handling. In deploy mode: roll back on our own, or ask a human.
/// In rollback mode: resolve the target ourselves, or take the given one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RollbackMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply the decision recorded by an injected decision step
    Resume {
        /// Serialized decision payload
        #[arg(long, env = "ARGOCD_DEPLOY_DECISION_PAYLOAD", hide_env_values = true)]
        payload: String,
    },
}

/// Argo CD deployment step for Buildkite.
#[derive(Clone, Parser)]
#[command(name = "argocd-deploy")]
#[command(about = "Deploy and roll back Argo CD applications from a pipeline step", long_about = None)]
#[command(version)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Argo CD application name
    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_APP")]
    pub app: Option<String>,

    #[arg(long, value_enum, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_MODE", default_value_t = Mode::Deploy)]
    pub mode: Mode,

    #[arg(
        long,
        value_enum,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_ROLLBACK_MODE",
        default_value_t = RollbackMode::Auto
    )]
    pub rollback_mode: RollbackMode,

    /// Timeout passed to sync, rollback and wait (seconds)
    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_TIMEOUT",
        default_value_t = DEFAULT_OPERATION_TIMEOUT_SECS
    )]
    pub timeout: u64,

    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_ARGOCD_SERVER")]
    pub argocd_server: Option<String>,

    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_ARGOCD_USERNAME")]
    pub argocd_username: Option<String>,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_ARGOCD_PASSWORD",
        hide_env_values = true
    )]
    pub argocd_password: Option<String>,

    /// History id or source revision to roll back to
    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_TARGET_REVISION")]
    pub target_revision: Option<String>,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_HEALTH_CHECK_INTERVAL",
        default_value_t = crate::health::DEFAULT_INTERVAL_SECS
    )]
    pub health_check_interval: u64,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_HEALTH_CHECK_TIMEOUT",
        default_value_t = crate::health::DEFAULT_TIMEOUT_SECS
    )]
    pub health_check_timeout: u64,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_COLLECT_LOGS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub collect_logs: bool,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_UPLOAD_ARTIFACTS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub upload_artifacts: bool,

    #[arg(
        long,
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_LOG_LINES",
        default_value_t = DEFAULT_LOG_LINES
    )]
    pub log_lines: u32,

    #[arg(
        long = "notifications-slack-channel",
        env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_NOTIFICATIONS_SLACK_CHANNEL"
    )]
    pub slack_channel: Option<String>,

    /// Directory for run log files
    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Keep metadata in a local JSON file instead of buildkite-agent
    #[arg(long, env = "BUILDKITE_PLUGIN_ARGOCD_DEPLOYMENT_METADATA_DIR")]
    pub metadata_dir: Option<PathBuf>,
}

/// Controller login. The password never shows up in `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("command", &self.command.as_ref().map(|_| "resume"))
            .field("app", &self.app)
            .field("mode", &self.mode)
            .field("rollback_mode", &self.rollback_mode)
            .field("timeout", &self.timeout)
            .field("argocd_server", &self.argocd_server)
            .field("argocd_username", &self.argocd_username)
            .field("argocd_password", &self.argocd_password.as_ref().map(|_| "[REDACTED]"))
            .field("target_revision", &self.target_revision)
            .field("health_check_interval", &self.health_check_interval)
            .field("health_check_timeout", &self.health_check_timeout)
            .field("collect_logs", &self.collect_logs)
            .field("upload_artifacts", &self.upload_artifacts)
            .field("log_lines", &self.log_lines)
            .field("slack_channel", &self.slack_channel)
            .field("work_dir", &self.work_dir)
            .field("metadata_dir", &self.metadata_dir)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Check required input for the selected mode.
    ///
    /// A `resume` only needs credentials when the decision turns out to be
    /// a rollback, which is checked once the decision has been read.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.command.is_some() {
            return Ok(());
        }

        self.app_name()?;

        if self.mode == Mode::Rollback
            && self.rollback_mode == RollbackMode::Manual
            && non_empty(&self.target_revision).is_none()
        {
            return Err(DeployError::Configuration(
                "target-revision is required for a manual rollback".into(),
            ));
        }

        self.credentials()?;
        Ok(())
    }

    pub fn app_name(&self) -> Result<&str, DeployError> {
        non_empty(&self.app).ok_or_else(|| DeployError::Configuration("app is required".into()))
    }

    /// Controller credentials. The password falls back to [`PASSWORD_ENV`].
    pub fn credentials(&self) -> Result<Credentials, DeployError> {
        self.credentials_with(std::env::var(PASSWORD_ENV).ok())
    }

    fn credentials_with(&self, fallback_password: Option<String>) -> Result<Credentials, DeployError> {
        let server = non_empty(&self.argocd_server)
            .ok_or_else(|| DeployError::Configuration("argocd-server is required".into()))?;
        let username = non_empty(&self.argocd_username)
            .ok_or_else(|| DeployError::Configuration("argocd-username is required".into()))?;
        let password = self
            .argocd_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| fallback_password.filter(|p| !p.is_empty()))
            .ok_or_else(|| {
                DeployError::Configuration(format!(
                    "argocd-password is required (or set {})",
                    PASSWORD_ENV
                ))
            })?;

        Ok(Credentials {
            server: server.to_string(),
            username: username.to_string(),
            password,
        })
    }

    /// Operation timeout, defaulted when out of range.
    pub fn operation_timeout_secs(&self) -> u64 {
        if (MIN_OPERATION_TIMEOUT_SECS..=MAX_OPERATION_TIMEOUT_SECS).contains(&self.timeout) {
            return self.timeout;
        }
        warn!(
            timeout = self.timeout,
            default = DEFAULT_OPERATION_TIMEOUT_SECS,
            "timeout out of range [{}, {}], using default",
            MIN_OPERATION_TIMEOUT_SECS,
            MAX_OPERATION_TIMEOUT_SECS
        );
        DEFAULT_OPERATION_TIMEOUT_SECS
    }

    pub fn log_lines(&self) -> u32 {
        if (MIN_LOG_LINES..=MAX_LOG_LINES).contains(&self.log_lines) {
            return self.log_lines;
        }
        warn!(
            log_lines = self.log_lines,
            default = DEFAULT_LOG_LINES,
            "log-lines out of range [{}, {}], using default",
            MIN_LOG_LINES,
            MAX_LOG_LINES
        );
        DEFAULT_LOG_LINES
    }

    pub fn health_settings(&self) -> HealthCheckSettings {
        HealthCheckSettings::new(self.health_check_interval, self.health_check_timeout)
    }

    pub fn report_settings(&self) -> ReportSettings {
        let defaults = ReportSettings::default();
        ReportSettings {
            collect_logs: self.collect_logs,
            upload_artifacts: self.upload_artifacts,
            log_lines: self.log_lines(),
            work_dir: self.work_dir.clone().unwrap_or(defaults.work_dir),
            slack_channel: non_empty(&self.slack_channel).map(str::to_string),
        }
    }

    /// Plugin environment for the decision follow-up step, so it runs with
    /// the same settings. The password is left out; a rollback decision
    /// reads it from [`PASSWORD_ENV`] in the agent environment.
    pub fn resume_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut put = |name: &str, value: String| {
            env.insert(format!("{}{}", ENV_PREFIX, name), value);
        };

        if let Some(server) = non_empty(&self.argocd_server) {
            put("ARGOCD_SERVER", server.to_string());
        }
        if let Some(username) = non_empty(&self.argocd_username) {
            put("ARGOCD_USERNAME", username.to_string());
        }
        put("COLLECT_LOGS", self.collect_logs.to_string());
        put("UPLOAD_ARTIFACTS", self.upload_artifacts.to_string());
        put("LOG_LINES", self.log_lines.to_string());
        if let Some(channel) = non_empty(&self.slack_channel) {
            put("NOTIFICATIONS_SLACK_CHANNEL", channel.to_string());
        }
        if let Some(dir) = &self.work_dir {
            put("WORK_DIR", dir.display().to_string());
        }
        if let Some(dir) = &self.metadata_dir {
            put("METADATA_DIR", dir.display().to_string());
        }
        env
    }
}
