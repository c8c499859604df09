//! Revision Resolver
//!
//! Answers "which revision do we roll back to?" from two unreliable
//! sources: ephemeral cross-run metadata and the controller's
//! size-limited history window. Nothing it returns is absent from the
//! window it just fetched.

use crate::backend::ArgoBackend;
use crate::error::DeployError;
use crate::store::{DeploymentLedger, HistoryOutcome, MetadataStore};
use crate::types::HistoryWindow;
use tracing::{debug, info, warn};

/// Where a resolved revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// The recorded previous version, still present in the window.
    Metadata,
    /// Newest history entry with a recorded successful outcome.
    OutcomeScan,
    /// Positional guess: the entry before the latest one.
    Positional,
}

/// A rollback target that exists in the current history window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub history_id: u64,
    pub revision: String,
    pub source: ResolutionSource,
}

pub struct RevisionResolver<'a, B: ArgoBackend> {
    backend: &'a B,
    ledger: DeploymentLedger<'a>,
}

impl<'a, B: ArgoBackend> RevisionResolver<'a, B> {
    pub fn new(backend: &'a B, store: &'a dyn MetadataStore) -> Self {
        Self {
            backend,
            ledger: DeploymentLedger::new(store),
        }
    }

    /// Resolve the previous stable revision of `app`.
    ///
    /// First success wins:
    /// 1. recorded previous version, if still in the window
    /// 2. newest entry whose recorded outcome is success
    /// 3. second-from-last entry, then third-from-last
    ///
    /// `Ok(None)` means nothing resolvable.
    pub async fn resolve_previous(&self, app: &str) -> Result<Option<Resolution>, DeployError> {
        let window = self.backend.history(app).await?;
        self.resolve_in_window(app, &window).await
    }

    /// Same as [`Self::resolve_previous`] against an already fetched window.
    pub async fn resolve_in_window(
        &self,
        app: &str,
        window: &HistoryWindow,
    ) -> Result<Option<Resolution>, DeployError> {
        if window.is_empty() {
            warn!(app = %app, "history window is empty");
            return Ok(None);
        }

        if let Some(found) = self.from_metadata(app, window).await {
            return Ok(Some(found));
        }

        if let Some(found) = self.from_outcomes(app, window).await {
            return Ok(Some(found));
        }

        // Assumes linear, non-concurrent deploys. Not extended on purpose.
        let positional = window.nth_from_last(2).or_else(|| window.nth_from_last(3));
        match positional {
            Some(entry) => {
                info!(app = %app, history_id = entry.id, "falling back to positional history entry");
                Ok(Some(Resolution {
                    history_id: entry.id,
                    revision: entry.revision.clone(),
                    source: ResolutionSource::Positional,
                }))
            }
            None => {
                warn!(app = %app, entries = window.len(), "no previous revision resolvable");
                Ok(None)
            }
        }
    }

    async fn from_metadata(&self, app: &str, window: &HistoryWindow) -> Option<Resolution> {
        let recorded = match self.ledger.previous_version(app).await {
            Ok(v) => v?,
            Err(e) => {
                warn!(app = %app, error = %e, "could not read recorded previous version");
                return None;
            }
        };

        match window.entries().iter().find(|e| e.id == recorded) {
            Some(entry) => {
                info!(app = %app, history_id = entry.id, "using recorded previous version");
                Some(Resolution {
                    history_id: entry.id,
                    revision: entry.revision.clone(),
                    source: ResolutionSource::Metadata,
                })
            }
            None => {
                warn!(
                    app = %app,
                    history_id = recorded,
                    "recorded previous version is no longer in the history window"
                );
                None
            }
        }
    }

    async fn from_outcomes(&self, app: &str, window: &HistoryWindow) -> Option<Resolution> {
        for entry in window.newest_first() {
            match self.ledger.history_outcome(app, entry.id).await {
                Ok(Some(HistoryOutcome::Success)) => {
                    info!(app = %app, history_id = entry.id, "using last successful history entry");
                    return Some(Resolution {
                        history_id: entry.id,
                        revision: entry.revision.clone(),
                        source: ResolutionSource::OutcomeScan,
                    });
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(app = %app, history_id = entry.id, error = %e, "outcome lookup failed");
                    continue;
                }
            }
        }
        None
    }

    /// Map a rollback target to a history id.
    ///
    /// An all-digit target is already a history id and is returned as is.
    /// Otherwise it is matched against the window's revision column; the
    /// first row whose revision equals, contains, or is contained in the
    /// target wins.
    pub async fn resolve_history_id(
        &self,
        app: &str,
        target: &str,
    ) -> Result<Option<u64>, DeployError> {
        let target = target.trim();
        if target.is_empty() {
            return Ok(None);
        }
        if let Some(id) = parse_history_id(target) {
            return Ok(Some(id));
        }

        let window = self.backend.history(app).await?;
        let found = window
            .entries()
            .iter()
            .find(|e| e.matches_revision(target))
            .map(|e| e.id);

        match found {
            Some(id) => debug!(app = %app, target = %target, history_id = id, "matched revision"),
            None => warn!(app = %app, target = %target, "revision not found in history window"),
        }
        Ok(found)
    }
}

/// `Some(id)` when `raw` is a bare history id.
pub fn parse_history_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeploymentRecord, MemoryMetadataStore};
    use crate::testing::FakeArgo;

    async fn remember_previous(store: &MemoryMetadataStore, app: &str, id: u64) {
        DeploymentLedger::new(store)
            .save_record(&DeploymentRecord::deploying(app, Some(id)))
            .await
            .unwrap();
    }

    async fn mark(store: &MemoryMetadataStore, app: &str, id: u64, outcome: HistoryOutcome) {
        DeploymentLedger::new(store)
            .record_outcome(app, id, outcome)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_metadata_takes_precedence() {
        let argo = FakeArgo::new().with_history(&[(5, "aaa"), (6, "bbb"), (7, "ccc"), (8, "ddd")]);
        let store = MemoryMetadataStore::new();
        remember_previous(&store, "web", 6).await;
        mark(&store, "web", 7, HistoryOutcome::Success).await;

        let resolver = RevisionResolver::new(&argo, &store);
        let found = resolver.resolve_previous("web").await.unwrap().unwrap();
        assert_eq!(found.history_id, 6);
        assert_eq!(found.revision, "bbb");
        assert_eq!(found.source, ResolutionSource::Metadata);
    }

    #[tokio::test]
    async fn test_evicted_metadata_is_discarded() {
        let argo = FakeArgo::new().with_history(&[(5, "aaa"), (6, "bbb"), (7, "ccc"), (8, "ddd")]);
        let store = MemoryMetadataStore::new();
        remember_previous(&store, "web", 2).await;
        mark(&store, "web", 5, HistoryOutcome::Success).await;

        let resolver = RevisionResolver::new(&argo, &store);
        let found = resolver.resolve_previous("web").await.unwrap().unwrap();
        assert_eq!(found.history_id, 5);
        assert_eq!(found.source, ResolutionSource::OutcomeScan);
    }

    #[tokio::test]
    async fn test_outcome_scan_is_newest_first() {
        let argo = FakeArgo::new().with_history(&[(5, "aaa"), (6, "bbb"), (7, "ccc"), (8, "ddd")]);
        let store = MemoryMetadataStore::new();
        mark(&store, "web", 5, HistoryOutcome::Success).await;
        mark(&store, "web", 6, HistoryOutcome::Success).await;
        mark(&store, "web", 7, HistoryOutcome::Failed).await;
        mark(&store, "web", 8, HistoryOutcome::Failed).await;

        let resolver = RevisionResolver::new(&argo, &store);
        let found = resolver.resolve_previous("web").await.unwrap().unwrap();
        assert_eq!(found.history_id, 6);
    }

    #[tokio::test]
    async fn test_positional_fallback() {
        let argo = FakeArgo::new().with_history(&[(5, "aaa"), (6, "bbb"), (7, "ccc")]);
        let store = MemoryMetadataStore::new();

        let resolver = RevisionResolver::new(&argo, &store);
        let found = resolver.resolve_previous("web").await.unwrap().unwrap();
        assert_eq!(found.history_id, 6);
        assert_eq!(found.source, ResolutionSource::Positional);
    }

    #[tokio::test]
    async fn test_evicted_metadata_never_returned_even_positionally() {
        let argo = FakeArgo::new().with_history(&[(9, "iii"), (10, "jjj")]);
        let store = MemoryMetadataStore::new();
        remember_previous(&store, "web", 3).await;

        let resolver = RevisionResolver::new(&argo, &store);
        let found = resolver.resolve_previous("web").await.unwrap().unwrap();
        assert_eq!(found.history_id, 9);
        assert_ne!(found.history_id, 3);
    }

    #[tokio::test]
    async fn test_nothing_resolvable() {
        let store = MemoryMetadataStore::new();

        let single = FakeArgo::new().with_history(&[(1, "aaa")]);
        let resolver = RevisionResolver::new(&single, &store);
        assert!(resolver.resolve_previous("web").await.unwrap().is_none());

        let empty = FakeArgo::new();
        let resolver = RevisionResolver::new(&empty, &store);
        assert!(resolver.resolve_previous("web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_history_id() {
        let argo = FakeArgo::new().with_history(&[(5, "4f1c2a9d8e7f"), (6, "9be07d1"), (7, "4f1c2a9d8e7f")]);
        let store = MemoryMetadataStore::new();
        let resolver = RevisionResolver::new(&argo, &store);

        // Already a history id: verbatim, no history lookup
        assert_eq!(resolver.resolve_history_id("web", "42").await.unwrap(), Some(42));
        assert_eq!(argo.count("history"), 0);

        // Short SHA against long, first match wins
        assert_eq!(resolver.resolve_history_id("web", "4f1c2a9").await.unwrap(), Some(5));
        // Long SHA against short
        assert_eq!(
            resolver.resolve_history_id("web", "9be07d1aa3c0ffee").await.unwrap(),
            Some(6)
        );
        assert_eq!(resolver.resolve_history_id("web", "deadbeef").await.unwrap(), None);
        assert_eq!(resolver.resolve_history_id("web", "  ").await.unwrap(), None);
    }

    #[test]
    fn test_parse_history_id() {
        assert_eq!(parse_history_id("12"), Some(12));
        assert_eq!(parse_history_id(" 7\n"), Some(7));
        assert_eq!(parse_history_id("a1b2"), None);
        assert_eq!(parse_history_id(""), None);
    }
}
