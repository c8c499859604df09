//! [`MetadataStore`] trait definition.

use crate::error::DeployError;
use async_trait::async_trait;

/// Key/value persistence that survives across otherwise stateless
/// pipeline steps.
///
/// Injected into every component that needs it; nothing reaches for a
/// global. Reading a key that was never written yields `None`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a value. Returns `None` if the key is absent or empty.
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError>;

    /// Write a value, overwriting any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), DeployError>;
}
