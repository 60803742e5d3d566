//! Source contracts.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use transfer::Transfer;

use crate::ProviderError;

/// Information about a source, available once it has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Provider-specific identifier (may be empty).
    pub id: String,
    /// Human-readable title.
    pub title: String,
}

/// An identified-but-unresolved download: a provider recognized the URL and
/// can say what it is, but has not yet fetched the metadata needed to
/// download it.
#[async_trait]
pub trait Source: Send + Sync {
    /// The canonical URL for this source. Matching this URL against the
    /// provider that produced the source yields an equivalent source.
    fn url(&self) -> &str;

    /// Human-readable description, suitable as a download's display name.
    fn display_name(&self) -> String;

    /// Fetch whatever additional information is needed to download, turning
    /// this source into a resolved one.
    ///
    /// Must return promptly with [`ProviderError::Cancelled`] when the token
    /// fires.
    async fn recon(
        &self,
        token: CancellationToken,
    ) -> Result<Arc<dyn ResolvedSource>, ProviderError>;
}

/// A fully-resolved downloadable artifact.
#[async_trait]
pub trait ResolvedSource: Send + Sync {
    /// Human-readable description of the resolved download.
    fn display_name(&self) -> String;

    /// Resolved metadata.
    fn info(&self) -> &SourceInfo;

    /// Fetch the actual bytes into the sink.
    ///
    /// All I/O must honor `sink.token()`.
    async fn download(&self, sink: &Transfer) -> Result<(), ProviderError>;
}
