//! Error types for the deploy/rollback orchestration.
//!
//! No `anyhow` leakage. Explicit, typed errors. Health states are not
//! errors: a degraded application is a [`crate::HealthOutcome`], not a
//! [`DeployError`].

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing or invalid required input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Authentication failed or the controller is unreachable.
    #[error("controller unreachable: {0}")]
    Connectivity(String),

    /// No resolvable revision or history entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// A controller or agent command exited non-zero.
    #[error("command `{command}` failed: code={code}, stderr={stderr}")]
    Operation {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Controller output could not be decoded.
    #[error("failed to decode controller output: {0}")]
    Decode(String),

    #[error("metadata store error: {0}")]
    Storage(String),

    #[error("invalid workflow state: {0}")]
    InvalidState(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The process was told to stop (SIGINT / SIGTERM) mid-operation.
    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl DeployError {
    /// Build an [`DeployError::Operation`] from a command line and its result.
    pub fn operation(
        command: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        DeployError::Operation {
            command: command.into(),
            code: code.unwrap_or(-1),
            stderr: stderr.into(),
        }
    }

    /// Whether this error ends the run immediately.
    ///
    /// Operation failures are not fatal on their own: they feed the
    /// failure-branch logic of the orchestrators.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeployError::Configuration(_)
                | DeployError::Connectivity(_)
                | DeployError::NotFound(_)
                | DeployError::InvalidState(_)
                | DeployError::Interrupted(_)
        )
    }
}
