//! File-backed metadata store.
//!
//! Stores every key in a single `metadata.json` object under
//! `~/.argocd-deploy/` (or a caller-supplied directory). Lets the
//! orchestration run outside a CI agent while keeping memory across runs.

use crate::error::DeployError;
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// File-backed implementation of [`MetadataStore`].
pub struct FileMetadataStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileMetadataStore {
    /// Create a store using the default directory (`~/.argocd-deploy`).
    pub async fn new_default() -> Result<Self, DeployError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DeployError::Storage("could not determine home directory".into()))?;
        Self::new(home.join(".argocd-deploy")).await
    }

    /// Create a store at a custom directory path.
    pub async fn new(dir: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create metadata dir: {}", e)))?;

        Ok(Self {
            path: dir.join("metadata.json"),
            lock: Mutex::new(()),
        })
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, DeployError> {
        if tokio::fs::metadata(&self.path).await.is_err() {
            return Ok(BTreeMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to read metadata: {}", e)))?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content)
            .map_err(|e| DeployError::Storage(format!("failed to parse metadata: {}", e)))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError> {
        let _guard = self.lock.lock().await;
        let values = self.read_all().await?;
        Ok(values.get(key).filter(|v| !v.is_empty()).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value.to_string());

        let content = serde_json::to_string_pretty(&values)
            .map_err(|e| DeployError::Storage(format!("failed to serialize metadata: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to write metadata: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to replace metadata: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("argocd-deploy-test-{}", rand::random::<u32>()))
    }

    #[tokio::test]
    async fn test_file_metadata_store_lifecycle() {
        let dir = temp_dir();
        let store = FileMetadataStore::new(dir.clone()).await.unwrap();

        assert!(store.get("missing").await.unwrap().is_none());

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));

        // Overwrite
        store.set("a", "3").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("3"));

        // Empty values read as absent
        store.set("b", "").await.unwrap();
        assert!(store.get("b").await.unwrap().is_none());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_file_metadata_store_persist_across_instances() {
        let dir = temp_dir();

        {
            let store = FileMetadataStore::new(dir.clone()).await.unwrap();
            store.set("argocd-deploy:web:history:7", "success").await.unwrap();
        }

        let store2 = FileMetadataStore::new(dir.clone()).await.unwrap();
        assert_eq!(
            store2.get("argocd-deploy:web:history:7").await.unwrap().as_deref(),
            Some("success")
        );

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_file_metadata_store_rejects_corrupt_file() {
        let dir = temp_dir();
        let store = FileMetadataStore::new(dir.clone()).await.unwrap();
        tokio::fs::write(dir.join("metadata.json"), "not valid json")
            .await
            .unwrap();

        let result = store.get("a").await;
        assert!(matches!(result, Err(DeployError::Storage(_))));

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
