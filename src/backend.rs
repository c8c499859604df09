//! The controller seam: ArgoBackend
//!
//! This is the single abstraction point for the delivery controller.
//! The orchestrators are pure logic; they don't know whether the
//! controller is reached through the `argocd` binary, a gRPC client or
//! a test double. That's the implementor's problem.

use crate::error::DeployError;
use crate::history::AppView;
use crate::types::{HistoryWindow, SyncPolicy};
use std::future::Future;

/// Everything the orchestrators ask of the delivery controller.
///
/// Abstracts:
/// - Authentication
/// - Application status and history queries (Revision Store Adapter)
/// - Imperative sync / rollback / wait commands
/// - Sync policy toggling
/// - Log retrieval
pub trait ArgoBackend: Send + Sync {
    // ═══════════════════════════════════════════════════════════════
    // SESSION
    // ═══════════════════════════════════════════════════════════════

    /// Authenticate against the controller.
    ///
    /// Failures map to [`DeployError::Connectivity`].
    fn login(&self) -> impl Future<Output = Result<(), DeployError>> + Send;

    // ═══════════════════════════════════════════════════════════════
    // QUERIES (read-only)
    // ═══════════════════════════════════════════════════════════════

    /// `app get --output json`, decoded.
    fn get_app(&self, app: &str) -> impl Future<Output = Result<AppView, DeployError>> + Send;

    /// `app history`, decoded into the retained window.
    fn history(&self, app: &str) -> impl Future<Output = Result<HistoryWindow, DeployError>> + Send;

    /// `app logs --tail <lines>`.
    fn logs(&self, app: &str, lines: u32)
        -> impl Future<Output = Result<String, DeployError>> + Send;

    // ═══════════════════════════════════════════════════════════════
    // COMMANDS (mutate controller state)
    // ═══════════════════════════════════════════════════════════════

    /// `app sync --timeout <secs>`.
    fn sync(&self, app: &str, timeout_secs: u64)
        -> impl Future<Output = Result<(), DeployError>> + Send;

    /// `app rollback <history_id> --timeout <secs>`.
    fn rollback(
        &self,
        app: &str,
        history_id: u64,
        timeout_secs: u64,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// `app wait --health --timeout <secs>`. Returns once healthy.
    fn wait_healthy(
        &self,
        app: &str,
        timeout_secs: u64,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;

    /// `app set --sync-policy <policy>`.
    fn set_sync_policy(
        &self,
        app: &str,
        policy: SyncPolicy,
    ) -> impl Future<Output = Result<(), DeployError>> + Send;
}
