//! Auto-Sync Guard
//!
//! An automated sync policy can race a rollback's own sync. The guard
//! pauses it for the duration of the caller's steps and puts it back on
//! every exit path. Restore is best-effort: a failure is logged and never
//! changes the caller's result.

use crate::backend::ArgoBackend;
use crate::error::DeployError;
use crate::types::SyncPolicy;
use std::future::Future;
use tracing::{info, warn};

pub struct AutoSyncGuard<'a, B: ArgoBackend> {
    backend: &'a B,
}

impl<'a, B: ArgoBackend> AutoSyncGuard<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Whether automated sync is currently enabled for `app`.
    ///
    /// An unreadable policy counts as disabled.
    pub async fn auto_sync_enabled(&self, app: &str) -> bool {
        match self.backend.get_app(app).await {
            Ok(view) => view.auto_sync,
            Err(e) => {
                warn!(app = %app, error = %e, "could not read sync policy, assuming manual");
                false
            }
        }
    }

    /// Run `steps` with automated sync paused, restoring it afterwards if
    /// it was enabled to begin with. SIGINT or SIGTERM stops the steps;
    /// the policy is still restored and the result is
    /// [`DeployError::Interrupted`].
    pub async fn run<F, Fut, T>(&self, app: &str, steps: F) -> Result<T, DeployError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        self.run_until(app, steps, shutdown_signal()).await
    }

    /// [`Self::run`] with the interruption source supplied by the caller.
    pub async fn run_until<F, Fut, T, C>(&self, app: &str, steps: F, cancel: C) -> Result<T, DeployError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
        C: Future<Output = String>,
    {
        let was_enabled = self.auto_sync_enabled(app).await;

        if was_enabled {
            info!(app = %app, "disabling automated sync for rollback");
            if let Err(e) = self.backend.set_sync_policy(app, SyncPolicy::Manual).await {
                warn!(app = %app, error = %e, "failed to disable automated sync");
            }
        }

        // Dropping the steps kills any controller command still running
        let output = tokio::select! {
            output = steps() => output,
            signal = cancel => {
                warn!(app = %app, signal = %signal, "interrupted, stopping rollback");
                Err(DeployError::Interrupted(signal))
            }
        };

        if was_enabled {
            self.restore(app).await;
        }

        output
    }

    async fn restore(&self, app: &str) {
        match self
            .backend
            .set_sync_policy(app, SyncPolicy::Automated)
            .await
        {
            Ok(()) => info!(app = %app, "automated sync restored"),
            Err(e) => warn!(app = %app, error = %e, "failed to restore automated sync"),
        }
    }
}

/// Resolves with the signal name on SIGINT or, on unix, SIGTERM (what a
/// Buildkite job cancel sends). A handler that can't be installed never
/// fires.
pub async fn shutdown_signal() -> String {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT".to_string(),
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM".to_string()
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<String>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}
