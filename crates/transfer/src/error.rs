use thiserror::Error;

/// Errors produced while saving bytes.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer's cancellation token fired mid-save.
    #[error("transfer cancelled")]
    Cancelled,

    /// Request construction or execution failed, or the server answered
    /// with an error status.
    #[error("request failed: {0}")]
    Request(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
