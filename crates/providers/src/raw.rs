//! The `raw` provider: direct links to video files.
//!
//! Matches plain http(s) URLs whose path ends in a known video extension.
//! There is nothing to resolve, so reconnaissance is trivial and the
//! download is a single streamed GET.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use transfer::Transfer;

use crate::{
    filename_from_url, Provider, ProviderError, ResolvedSource, Source, SourceInfo,
    PRIORITY_LOWEST,
};

/// Name the raw provider registers under.
pub const PROVIDER_NAME: &str = "raw";

/// Which URLs the raw provider accepts.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub schemes: HashSet<String>,
    pub extensions: HashSet<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            schemes: ["http", "https"].iter().map(|s| s.to_string()).collect(),
            extensions: ["flv", "m4v", "mkv", "mp4", "webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RawConfig {
    /// Match a URL against the configured schemes and extensions.
    pub fn match_url(&self, input: &str) -> Result<Arc<dyn Source>, ProviderError> {
        let url = url::Url::parse(input)
            .map_err(|e| ProviderError::MatchFailed(format!("invalid URL: {e}")))?;
        if !self.schemes.contains(url.scheme()) {
            return Err(ProviderError::MatchFailed(format!(
                "unknown URL scheme {}",
                url.scheme()
            )));
        }
        let filename = filename_from_url(input)?;
        let (title, extension) = match filename.rsplit_once('.') {
            Some((title, ext)) if !title.is_empty() => (title.to_string(), ext.to_string()),
            _ => return Err(ProviderError::MatchFailed("no file extension found".into())),
        };
        if !self.extensions.contains(&extension) {
            return Err(ProviderError::MatchFailed(format!(
                "unknown file extension {extension}"
            )));
        }
        Ok(Arc::new(RawSource {
            url: input.to_string(),
            filename,
            info: SourceInfo {
                id: String::new(),
                title,
            },
        }))
    }

    /// Package this configuration as a registrable provider, at the lowest
    /// priority so specialized providers get first refusal.
    pub fn provider(self) -> Provider {
        Provider::new(
            PROVIDER_NAME,
            Arc::new(move |input: &str| self.match_url(input)),
        )
        .with_priority(PRIORITY_LOWEST)
    }
}

struct RawSource {
    url: String,
    filename: String,
    info: SourceInfo,
}

#[async_trait]
impl Source for RawSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn display_name(&self) -> String {
        self.info.title.clone()
    }

    async fn recon(
        &self,
        _token: CancellationToken,
    ) -> Result<Arc<dyn ResolvedSource>, ProviderError> {
        // A direct link carries everything needed already.
        Ok(Arc::new(RawResolved {
            url: self.url.clone(),
            filename: self.filename.clone(),
            info: self.info.clone(),
        }))
    }
}

struct RawResolved {
    url: String,
    filename: String,
    info: SourceInfo,
}

#[async_trait]
impl ResolvedSource for RawResolved {
    fn display_name(&self) -> String {
        self.info.title.clone()
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn download(&self, sink: &Transfer) -> Result<(), ProviderError> {
        sink.save_url(&self.filename, &self.url).await?;
        Ok(())
    }
}
