use thiserror::Error;

/// Errors from provider matching and source resolution.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// A provider was registered without a name.
    #[error("invalid provider")]
    InvalidProvider,

    /// A provider with the same name is already registered.
    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),

    /// No registered provider by that name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// No provider accepted the input. Carries the per-provider failure
    /// report.
    #[error("no provider matched the input{}", format_reasons(.0))]
    NoMatch(Vec<(String, String)>),

    /// The provider recognized the URL but could not produce a source.
    #[error("match failed: {0}")]
    MatchFailed(String),

    /// Reconnaissance failed.
    #[error("recon failed: {0}")]
    ReconFailed(String),

    /// Fetching the actual bytes failed.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The operation's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

fn format_reasons(reasons: &[(String, String)]) -> String {
    if reasons.is_empty() {
        return String::new();
    }
    let joined = reasons
        .iter()
        .map(|(name, reason)| format!("[{name}] {reason}"))
        .collect::<Vec<_>>()
        .join("; ");
    format!(": {joined}")
}

impl From<transfer::TransferError> for ProviderError {
    fn from(err: transfer::TransferError) -> Self {
        match err {
            transfer::TransferError::Cancelled => Self::Cancelled,
            other => Self::DownloadFailed(other.to_string()),
        }
    }
}
