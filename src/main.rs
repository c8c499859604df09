//! `argocd-deploy`: the Buildkite step entrypoint.
//!
//! Exit code 0 for success, a paused run awaiting a decision, or an
//! accepted failure; 1 for everything else.

use argocd_deploy_rs::{ArgoCdCli, BuildkiteAgentCli, Config, MetadataStore, Runner};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env
    dotenvy::dotenv().ok();

    // Control verbosity with RUST_LOG, default info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::parse();
    debug!(config = ?config, "configuration");

    // Missing credentials are reported by the runner before any call
    let argo = ArgoCdCli::new(config.credentials().unwrap_or_default());
    let agent = BuildkiteAgentCli::new();

    #[cfg(feature = "file-storage")]
    let file_store = match &config.metadata_dir {
        Some(dir) => match argocd_deploy_rs::FileMetadataStore::new(dir.clone()).await {
            Ok(store) => Some(store),
            Err(e) => {
                error!(error = %e, "failed to open metadata directory");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    #[cfg(feature = "file-storage")]
    let store: &dyn MetadataStore = match &file_store {
        Some(store) => store,
        None => &agent,
    };

    #[cfg(not(feature = "file-storage"))]
    let store: &dyn MetadataStore = {
        if config.metadata_dir.is_some() {
            tracing::warn!("metadata-dir needs the file-storage feature, using buildkite-agent");
        }
        &agent
    };

    match Runner::new(&config, &argo, &agent, store).run().await {
        Ok(outcome) => {
            info!(outcome = outcome.name(), "done");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!(error = %e, "failed");
            ExitCode::FAILURE
        }
    }
}
