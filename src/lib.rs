//! Argo CD Deploy Library
//!
//! Deploy and rollback orchestration for Argo CD applications, run as a
//! Buildkite pipeline step.
//!
//! # Design
//!
//! The orchestration logic is decoupled from how the controller and the CI
//! runtime are reached. You implement [`ArgoBackend`] (the controller),
//! [`PipelineAgent`] (annotations, artifacts, pipeline injection) and
//! [`MetadataStore`] (cross-step key/value memory), and the engines handle
//! the decisions: wait, fail fast, roll back, or pause for a human.
//!
//! The `default-client` feature provides implementations over the
//! `argocd` and `buildkite-agent` binaries.
//!
//! # Usage
//!
//! ```ignore
//! use argocd_deploy_rs::{
//!     DeploymentState, DeploymentWorkflow, InputRequired, StepResult, WorkflowConfig,
//! };
//!
//! let workflow = DeploymentWorkflow::new(&argo, &agent, &store, WorkflowConfig::default());
//! let mut state = DeploymentState::new("web");
//!
//! match workflow.run_to_completion(&mut state).await? {
//!     StepResult::Complete => println!("Deployed (or rolled back)"),
//!     StepResult::NeedsInput(InputRequired::ManualDecision { payload }) => {
//!         println!("Waiting on a decision for history {}", payload.history_id)
//!     }
//!     StepResult::Failed(reason) => println!("Failed: {}", reason),
//!     _ => {}
//! }
//! ```

pub mod agent;
pub mod backend;
pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod health;
pub mod history;
pub mod notify;
pub mod report;
pub mod resolver;
pub mod rollback;
pub mod runner;
pub mod state;
pub mod store;
pub mod types;
pub mod workflow;

#[cfg(feature = "default-client")]
pub mod client;

#[cfg(test)]
mod testing;

// Re-export the main types at crate root for convenience
pub use agent::PipelineAgent;
pub use backend::ArgoBackend;
pub use config::{Config, Credentials, Mode, RollbackMode};
pub use error::DeployError;
pub use gate::{Continuation, ContinuationOutcome, Decision, DecisionPayload, ManualDecisionGate};
pub use guard::AutoSyncGuard;
pub use health::{HealthCheckSettings, HealthMonitor, HealthOutcome};
pub use history::AppView;
pub use notify::{Notification, NotificationKind, Notifier};
pub use report::{ReportSettings, Reporter};
pub use resolver::{Resolution, ResolutionSource, RevisionResolver};
pub use rollback::{RollbackOrchestrator, RollbackOutcome};
pub use runner::{RunOutcome, Runner};
pub use state::{DeploymentState, Step};
#[cfg(feature = "file-storage")]
pub use store::FileMetadataStore;
pub use store::{
    DeploymentLedger, DeploymentRecord, DeploymentStatus, HistoryOutcome, MemoryMetadataStore,
    MetadataStore,
};
pub use types::*;
pub use workflow::{DeploymentWorkflow, InputRequired, StepResult, WorkflowConfig};

#[cfg(feature = "default-client")]
pub use client::{ArgoCdCli, BuildkiteAgentCli};
