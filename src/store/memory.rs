//! In-memory metadata store.
//!
//! No persistence across processes. Used for dry local runs and as the
//! store behind the orchestration tests.

use crate::error::DeployError;
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError> {
        let values = self
            .values
            .lock()
            .map_err(|_| DeployError::Storage("metadata store lock poisoned".into()))?;
        Ok(values.get(key).filter(|v| !v.is_empty()).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DeployError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| DeployError::Storage("metadata store lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
