//! The session: a fleet of downloads behind one event stream.

mod events;

pub use events::DownloadEvent;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use pubsub::{Channel, Publisher};
use sync_utils::RwMutexed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::download::{
    Download, DownloadId, DownloadState, DownloadStatus, EphemeralState, PersistentState,
};
use crate::{Error, Result};

/// Capacity of the session's aggregate event publisher.
const SESSION_EVENT_CAPACITY: usize = 16;

/// Options for [`Session::add_download`].
#[derive(Debug, Clone, Default)]
pub struct AddDownloadOptions {
    /// Override the download's save path; the session default applies when
    /// unset.
    pub save_path: Option<PathBuf>,
}

/// Owns a fleet of downloads, assigns their IDs, rehydrates them from the
/// store, and aggregates their events into one stream.
///
/// Cloning is cheap; all clones refer to the same session.
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    token: CancellationToken,
    downloads: RwMutexed<HashMap<DownloadId, Download>>,
    events: Publisher<DownloadEvent>,
}

impl Session {
    /// Create a session under the given cancellation token and begin
    /// rehydrating persisted downloads in the background.
    ///
    /// Rehydrated downloads surface as `DownloadAdded` events; a client that
    /// needs a definitive view should [`subscribe`](Session::subscribe)
    /// before calling [`list_downloads`](Session::list_downloads).
    pub fn new(config: SessionConfig, parent_token: &CancellationToken) -> Session {
        let session = Session {
            inner: Arc::new(SessionInner {
                config,
                token: parent_token.child_token(),
                downloads: RwMutexed::default(),
                events: Publisher::with_capacity(SESSION_EVENT_CAPACITY),
            }),
        };
        let rehydrating = session.clone();
        tokio::spawn(async move { rehydrating.rehydrate().await });
        session
    }

    async fn rehydrate(&self) {
        let records = match self.inner.config.store.list_downloads().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to list persisted downloads");
                return;
            }
        };
        let count = records.len();
        for mut persistent in records {
            // No worker exists for a freshly loaded download, whatever the
            // stored status claims.
            persistent.status = persistent.status.non_running();
            let progress = if persistent.status == DownloadStatus::Complete {
                100
            } else {
                0
            };
            let state = DownloadState {
                persistent,
                ephemeral: EphemeralState { progress },
            };
            let id = state.persistent.id.clone();
            if let Err(err) = self.insert_download(state).await {
                warn!(%id, error = %err, "failed to rehydrate download");
            }
        }
        if count > 0 {
            info!(count, "rehydrated persisted downloads");
        }
    }

    /// Add a download for a fresh URL.
    pub async fn add_download(
        &self,
        url: impl Into<String>,
        options: AddDownloadOptions,
    ) -> Result<Download> {
        let persistent = PersistentState {
            id: DownloadId::random(),
            url: url.into(),
            save_path: options
                .save_path
                .unwrap_or_else(|| self.inner.config.default_save_path.clone()),
            added_at: Utc::now(),
            status: DownloadStatus::New,
            error_message: String::new(),
            provider_name: String::new(),
            display_name: String::new(),
        };
        self.insert_download(DownloadState {
            persistent,
            ephemeral: EphemeralState::default(),
        })
        .await
    }

    /// Common insertion path for fresh and rehydrated downloads.
    async fn insert_download(&self, state: DownloadState) -> Result<Download> {
        let download = Download::spawn(
            state.clone(),
            &self.inner.token,
            self.inner.config.store.clone(),
            self.inner.config.registry.clone(),
            self.inner.config.progress_update_interval,
        );

        // The closed check shares the map lock with `close`, which cancels
        // the token while holding it: a download either lands in the map
        // before the close sweeps it, or is rejected here.
        let inserted = self.inner.downloads.locked(|downloads| {
            if self.inner.token.is_cancelled() {
                return Err(Error::SessionClosed);
            }
            match downloads.entry(state.persistent.id.clone()) {
                Entry::Occupied(_) => Err(Error::DuplicateId(state.persistent.id.clone())),
                Entry::Vacant(entry) => {
                    entry.insert(download.clone());
                    Ok(())
                }
            }
        });
        if let Err(err) = inserted {
            download.close().await;
            return Err(err);
        }

        if let Err(err) = self
            .inner
            .config
            .store
            .write_download(&state.persistent)
            .await
        {
            warn!(id = %state.persistent.id, error = %err, "failed to persist added download");
        }

        // Aggregate this download's events. The subscription must not close
        // with the download's publisher: the session publisher outlives it.
        if download
            .events()
            .add_subscriber(Arc::new(self.inner.events.clone()), false)
            .await
            .is_err()
        {
            // Only possible when the download was already closed by a
            // concurrent session close.
            self.inner
                .downloads
                .locked(|downloads| downloads.remove(&state.persistent.id));
            download.close().await;
            return Err(Error::SessionClosed);
        }

        debug!(id = %state.persistent.id, url = %state.persistent.url, "download added");
        self.inner
            .events
            .send(DownloadEvent::Added {
                download: download.clone(),
            })
            .await;
        Ok(download)
    }

    /// Close a download and forget it, deleting its persisted record.
    ///
    /// The download's final `DownloadStopped` (if it was running) drains
    /// into the session stream before the `DownloadRemoved` this publishes.
    pub async fn remove_download(&self, id: &DownloadId) -> Result<Download> {
        let download = self
            .inner
            .downloads
            .locked(|downloads| downloads.remove(id))
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        download.close().await;
        let state = download.state();
        if let Err(err) = self
            .inner
            .config
            .store
            .delete_download(&state.persistent)
            .await
        {
            warn!(%id, error = %err, "failed to delete download record");
        }
        debug!(%id, "download removed");
        self.inner
            .events
            .send(DownloadEvent::Removed {
                download: download.clone(),
            })
            .await;
        Ok(download)
    }

    /// Look up a download by ID.
    pub fn get_download(&self, id: &DownloadId) -> Option<Download> {
        self.inner
            .downloads
            .read_locked(|downloads| downloads.get(id).cloned())
    }

    /// Snapshot of the current downloads, in no particular order.
    pub fn list_downloads(&self) -> Vec<Download> {
        self.inner
            .downloads
            .read_locked(|downloads| downloads.values().cloned().collect())
    }

    /// Subscribe to the aggregated event stream with the default capacity.
    pub async fn subscribe(&self) -> Result<Channel<DownloadEvent>> {
        self.inner
            .events
            .subscribe()
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Subscribe with an explicit queue capacity.
    pub async fn subscribe_with_capacity(&self, capacity: usize) -> Result<Channel<DownloadEvent>> {
        self.inner
            .events
            .subscribe_with_capacity(capacity)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Close the session: cancel everything, close every download in
    /// parallel, wait for each, then close the event stream. Idempotent.
    pub async fn close(&self) {
        let downloads = self.inner.downloads.locked(|downloads| {
            // Cancelling under the map lock linearizes against
            // `insert_download`'s closed check.
            self.inner.token.cancel();
            std::mem::take(downloads)
        });
        info!(count = downloads.len(), "session closing");
        futures::future::join_all(
            downloads
                .values()
                .map(|download| async move { download.close().await }),
        )
        .await;
        self.inner.events.close().await;
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .finish()
    }
}
