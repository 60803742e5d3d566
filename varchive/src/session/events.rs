//! Events observed at the session boundary.

use std::sync::Arc;

use crate::download::{Download, DownloadState};
use crate::Error;

/// Lifecycle and state events for downloads.
///
/// Every event identifies its download by handle; the current state is a
/// [`Download::state`] snapshot away, and `Updated` additionally carries the
/// exact before/after pair.
///
/// For a single download, a subscriber sees events in the order the command
/// loop produced them: `Added`, then any mix of `Updated`, then balanced
/// `Started`/`Stopped` pairs, and finally `Removed`.
#[derive(Clone)]
pub enum DownloadEvent {
    /// The download was added to a session (fresh or rehydrated).
    Added { download: Download },
    /// The download was removed from its session.
    Removed { download: Download },
    /// A worker started driving the download.
    Started { download: Download },
    /// The worker stopped; `error` is set when it failed.
    Stopped {
        download: Download,
        error: Option<Arc<Error>>,
    },
    /// The download's state changed.
    Updated {
        download: Download,
        old_state: DownloadState,
        new_state: DownloadState,
    },
}

impl DownloadEvent {
    /// The download this event relates to.
    pub fn download(&self) -> &Download {
        match self {
            Self::Added { download }
            | Self::Removed { download }
            | Self::Started { download }
            | Self::Stopped { download, .. }
            | Self::Updated { download, .. } => download,
        }
    }
}

impl std::fmt::Debug for DownloadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added { download } => {
                f.debug_struct("Added").field("id", &download.id()).finish()
            }
            Self::Removed { download } => {
                f.debug_struct("Removed").field("id", &download.id()).finish()
            }
            Self::Started { download } => {
                f.debug_struct("Started").field("id", &download.id()).finish()
            }
            Self::Stopped { download, error } => f
                .debug_struct("Stopped")
                .field("id", &download.id())
                .field("error", error)
                .finish(),
            Self::Updated {
                download,
                new_state,
                ..
            } => f
                .debug_struct("Updated")
                .field("id", &download.id())
                .field("status", &new_state.persistent.status)
                .field("progress", &new_state.ephemeral.progress)
                .finish(),
        }
    }
}
