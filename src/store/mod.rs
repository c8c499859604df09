//! Cross-run persistence.
//!
//! This module contains:
//! - [`MetadataStore`] trait + [`MemoryMetadataStore`], [`FileMetadataStore`]: key/value persistence
//! - [`DeploymentRecord`] / [`HistoryOutcome`]: what gets persisted
//! - [`DeploymentLedger`]: typed access over the key layout

mod ledger;
mod memory;
mod record;
mod store;

#[cfg(feature = "file-storage")]
pub mod file_backed;

pub use ledger::{decision_key, history_key, key_safe, record_key, DeploymentLedger};
pub use memory::MemoryMetadataStore;
pub use record::{DeploymentRecord, DeploymentStatus, HistoryOutcome};
pub(crate) use record::current_unix_time;
pub use store::MetadataStore;

#[cfg(feature = "file-storage")]
pub use file_backed::FileMetadataStore;
