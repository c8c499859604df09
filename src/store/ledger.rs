//! [`DeploymentLedger`]: typed access to the metadata key layout.
//!
//! ```text
//! argocd-deploy:<app>:deployment          JSON DeploymentRecord
//! argocd-deploy:<app>:history:<id>        success | failed
//! argocd-deploy/<app>/decision            rollback | accept
//! ```
//!
//! The decision key doubles as a block step field key, so it is limited
//! to letters, digits, `/`, `-` and `_`.

use crate::error::DeployError;
use crate::store::{DeploymentRecord, HistoryOutcome, MetadataStore};
use tracing::{debug, warn};

const KEY_PREFIX: &str = "argocd-deploy";

pub fn record_key(app: &str) -> String {
    format!("{}:{}:deployment", KEY_PREFIX, app)
}

pub fn history_key(app: &str, history_id: u64) -> String {
    format!("{}:{}:history:{}", KEY_PREFIX, app, history_id)
}

pub fn decision_key(app: &str) -> String {
    format!("{}/{}/decision", KEY_PREFIX, key_safe(app))
}

/// `raw` with everything outside `[A-Za-z0-9_-]` replaced by `-`.
pub fn key_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Reads and writes deployment records and per-history outcomes.
pub struct DeploymentLedger<'a> {
    store: &'a dyn MetadataStore,
}

impl<'a> DeploymentLedger<'a> {
    pub fn new(store: &'a dyn MetadataStore) -> Self {
        Self { store }
    }

    /// Load the record for `app`.
    ///
    /// A record that no longer parses is treated as absent: it is a hint,
    /// not a source of truth.
    pub async fn load_record(&self, app: &str) -> Result<Option<DeploymentRecord>, DeployError> {
        let Some(raw) = self.store.get(&record_key(app)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(app = %app, error = %e, "ignoring unreadable deployment record");
                Ok(None)
            }
        }
    }

    pub async fn save_record(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let json = serde_json::to_string(record)
            .map_err(|e| DeployError::Storage(format!("failed to serialize record: {}", e)))?;
        debug!(app = %record.app, status = record.status.as_str(), "saving deployment record");
        self.store.set(&record_key(&record.app), &json).await
    }

    /// Recorded previous version for `app`, if any.
    pub async fn previous_version(&self, app: &str) -> Result<Option<u64>, DeployError> {
        Ok(self.load_record(app).await?.and_then(|r| r.previous_version))
    }

    pub async fn history_outcome(
        &self,
        app: &str,
        history_id: u64,
    ) -> Result<Option<HistoryOutcome>, DeployError> {
        let raw = self.store.get(&history_key(app, history_id)).await?;
        Ok(raw.as_deref().and_then(HistoryOutcome::parse))
    }

    pub async fn record_outcome(
        &self,
        app: &str,
        history_id: u64,
        outcome: HistoryOutcome,
    ) -> Result<(), DeployError> {
        debug!(app = %app, history_id, outcome = outcome.as_str(), "recording history outcome");
        self.store
            .set(&history_key(app, history_id), outcome.as_str())
            .await
    }
}
