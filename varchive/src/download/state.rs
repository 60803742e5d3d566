//! Download identity, status, and state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique download identifier. Assigned at creation,
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    /// Generate a fresh random ID.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DownloadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DownloadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a download is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Freshly added, nothing has happened yet.
    #[default]
    New,
    /// A worker is looking for a provider that accepts the URL.
    Matching,
    /// A provider accepted the URL.
    Matched,
    /// A worker is resolving the matched source.
    Fetching,
    /// The source is resolved and ready to download.
    Ready,
    /// A worker is fetching actual bytes.
    Downloading,
    /// All bytes are on disk. Terminal.
    Complete,
    /// The last worker run failed. Recoverable: a later start re-enters the
    /// pipeline.
    Error,
}

impl DownloadStatus {
    /// Whether some active worker should currently be driving this
    /// download.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Matching | Self::Fetching | Self::Downloading)
    }

    /// The closest preceding status for which
    /// [`is_running`](DownloadStatus::is_running) is false; the status
    /// itself if it already is.
    pub fn non_running(&self) -> Self {
        match self {
            Self::Matching => Self::New,
            Self::Fetching => Self::Matched,
            Self::Downloading => Self::Ready,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Matching => "matching",
            Self::Matched => "matched",
            Self::Fetching => "fetching",
            Self::Ready => "ready",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered step in the download pipeline.
///
/// The *target* stage is how far the caller last asked to progress; the
/// worker advances the *current* stage toward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DownloadStage {
    #[default]
    Undefined,
    Matched,
    Resolved,
    Downloaded,
}

impl DownloadStage {
    /// Pipeline stages in execution order.
    pub(crate) const PIPELINE: [DownloadStage; 3] =
        [Self::Matched, Self::Resolved, Self::Downloaded];

    /// The stage a download with this (non-running) status has already
    /// reached. Used when rehydrating, where only the status survives.
    pub(crate) fn for_status(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Matched => Self::Matched,
            DownloadStatus::Ready => Self::Resolved,
            DownloadStatus::Complete => Self::Downloaded,
            _ => Self::Undefined,
        }
    }
}

/// The subset of download state that survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub id: DownloadId,
    pub url: String,
    pub save_path: PathBuf,
    pub added_at: DateTime<Utc>,
    pub status: DownloadStatus,
    /// Message of the error that stopped the last worker run, if any.
    #[serde(default)]
    pub error_message: String,
    /// Name of the provider that matched the URL (empty until matched).
    #[serde(default)]
    pub provider_name: String,
    /// Human-readable name, refined as the pipeline progresses.
    #[serde(default)]
    pub display_name: String,
}

/// The subset of download state that is not worth persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EphemeralState {
    /// Download progress, 0–100.
    pub progress: u8,
}

/// Complete state of a download: persistent ∪ ephemeral.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadState {
    pub persistent: PersistentState,
    pub ephemeral: EphemeralState,
}

impl DownloadState {
    pub fn id(&self) -> &DownloadId {
        &self.persistent.id
    }

    pub fn url(&self) -> &str {
        &self.persistent.url
    }

    pub fn status(&self) -> DownloadStatus {
        self.persistent.status
    }

    pub fn progress(&self) -> u8 {
        self.ephemeral.progress
    }
}
