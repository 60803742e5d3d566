//! Persistence contract for download records.
//!
//! The store is a collaborator: the core treats it as
//! authoritative-eventually but never lets a store failure take a download
//! down with it. A [`NullStore`] (no persistence at all) is valid.

mod json;

pub use json::JsonFileStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::download::PersistentState;

/// Errors from a download store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable storage for the persistent subset of download state.
///
/// Writes are durable before they return.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// All stored download records, in no particular order.
    async fn list_downloads(&self) -> Result<Vec<PersistentState>, StoreError>;

    /// Upsert a record by its ID.
    async fn write_download(&self, state: &PersistentState) -> Result<(), StoreError>;

    /// Delete a record by its ID. Deleting a missing record is not an
    /// error.
    async fn delete_download(&self, state: &PersistentState) -> Result<(), StoreError>;
}

/// A store that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl DownloadStore for NullStore {
    async fn list_downloads(&self) -> Result<Vec<PersistentState>, StoreError> {
        Ok(Vec::new())
    }

    async fn write_download(&self, _state: &PersistentState) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_download(&self, _state: &PersistentState) -> Result<(), StoreError> {
        Ok(())
    }
}
