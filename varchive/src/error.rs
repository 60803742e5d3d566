//! Crate-wide error types.

use thiserror::Error;

use crate::download::DownloadId;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The session has been closed; it no longer accepts operations.
    #[error("session closed")]
    SessionClosed,

    /// The download has been closed.
    #[error("download closed")]
    DownloadClosed,

    /// A download with this ID already exists in the session.
    #[error("duplicate download id: {0}")]
    DuplicateId(DownloadId),

    /// No download with this ID exists in the session.
    #[error("download not found: {0}")]
    NotFound(DownloadId),

    /// Provider matching or resolution failed.
    #[error(transparent)]
    Provider(#[from] providers::ProviderError),

    /// The persistent store failed.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Fetching bytes failed.
    #[error("transfer error: {0}")]
    Transfer(#[from] transfer::TransferError),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
