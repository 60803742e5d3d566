//! A single download and its actor.
//!
//! One download = one actor task running a command loop over a mailbox; all
//! mutation of the download happens on that task or on the one background
//! worker it owns. [`Download`] is the cloneable public handle: commands go
//! through the mailbox, state reads snapshot a mutex so they never wait on
//! the command loop.

mod actor;
mod state;
mod worker;

pub use state::{
    DownloadId, DownloadStage, DownloadState, DownloadStatus, EphemeralState, PersistentState,
};

use std::sync::Arc;
use std::time::Duration;

use providers::{ProviderRegistry, ResolvedSource, Source};
use pubsub::Publisher;
use sync_utils::{Event, Mutexed, RwMutexed};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::session::DownloadEvent;
use crate::store::DownloadStore;
use actor::DownloadActor;

/// Capacity of the actor mailbox.
const MAILBOX_CAPACITY: usize = 16;

/// Capacity of the download's event publisher input. Progress updates are
/// published non-blocking and drop when this saturates.
const EVENT_CAPACITY: usize = 16;

/// Commands the actor processes, one at a time.
pub(crate) enum DownloadMessage {
    /// Advance the target stage and make sure a worker is driving toward
    /// it.
    Start(DownloadStage),
    /// Cancel the active worker, if any.
    Stop,
    /// Replace the URL and reset the pipeline back to `new`.
    SetUrl(String),
}

/// Tracks how far the pipeline has gone and where it is asked to go, plus
/// the in-memory artifacts earlier stages produced for later ones.
#[derive(Default)]
pub(crate) struct Pipeline {
    pub(crate) target: DownloadStage,
    pub(crate) current: DownloadStage,
    pub(crate) source: Option<Arc<dyn Source>>,
    pub(crate) resolved: Option<Arc<dyn ResolvedSource>>,
}

/// State shared between the handle, the actor, and the worker.
pub(crate) struct Shared {
    pub(crate) state: RwMutexed<DownloadState>,
    pub(crate) pipeline: Mutexed<Pipeline>,
    pub(crate) running: Event,
    pub(crate) stopped: Event,
    pub(crate) complete: Event,
    pub(crate) done: Event,
    pub(crate) token: CancellationToken,
    pub(crate) mailbox: mpsc::Sender<DownloadMessage>,
    pub(crate) events: Publisher<DownloadEvent>,
    pub(crate) store: Arc<dyn DownloadStore>,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) progress_interval: Duration,
}

impl Shared {
    fn handle(self: &Arc<Self>) -> Download {
        Download {
            shared: self.clone(),
        }
    }

    /// Apply a state mutation, write the persistent subset through to the
    /// store if it changed, and publish `DownloadUpdated` if anything
    /// changed.
    ///
    /// The store write is best-effort: failures are logged and do not stop
    /// the download (the store is authoritative-eventually, not atomic with
    /// the in-memory change).
    pub(crate) async fn update_state(self: &Arc<Self>, f: impl FnOnce(&mut DownloadState)) {
        let Some((old, new)) = self.apply(f) else {
            return;
        };
        if new.persistent != old.persistent {
            if let Err(err) = self.store.write_download(&new.persistent).await {
                warn!(id = %new.persistent.id, error = %err, "failed to persist download state");
            }
        }
        let download = self.handle();
        self.events
            .send(DownloadEvent::Updated {
                download,
                old_state: old,
                new_state: new,
            })
            .await;
    }

    /// Ephemeral-only state update from the progress callback: publishes
    /// non-blocking (droppable under saturation) and never touches the
    /// store.
    pub(crate) fn update_progress(self: &Arc<Self>, progress: u8) {
        let Some((old, new)) = self.apply(|state| state.ephemeral.progress = progress) else {
            return;
        };
        debug_assert_eq!(old.persistent, new.persistent);
        let download = self.handle();
        self.events.try_send(DownloadEvent::Updated {
            download,
            old_state: old,
            new_state: new,
        });
    }

    /// Mutate under the state lock, maintaining the completion invariants.
    /// Returns `(old, new)` if anything changed.
    fn apply(self: &Arc<Self>, f: impl FnOnce(&mut DownloadState)) -> Option<(DownloadState, DownloadState)> {
        let (old, new) = self.state.locked(|state| {
            let old = state.clone();
            f(state);
            if state.persistent.status == DownloadStatus::Complete {
                state.ephemeral.progress = 100;
            }
            (old, state.clone())
        });
        if new == old {
            return None;
        }
        if new.persistent.status == DownloadStatus::Complete
            && old.persistent.status != DownloadStatus::Complete
        {
            self.complete.set();
        }
        Some((old, new))
    }
}

/// Handle to a download owned by a session.
///
/// Cloning is cheap; all clones refer to the same download. Commands are
/// fire-and-forget: callers observe their effect through events and
/// [`state`](Download::state) snapshots.
pub struct Download {
    shared: Arc<Shared>,
}

impl Download {
    /// Construct the download and spawn its actor.
    pub(crate) fn spawn(
        mut state: DownloadState,
        parent_token: &CancellationToken,
        store: Arc<dyn DownloadStore>,
        registry: Arc<ProviderRegistry>,
        progress_interval: Duration,
    ) -> Self {
        let complete = state.persistent.status == DownloadStatus::Complete;
        if complete {
            state.ephemeral.progress = 100;
        }
        let current = DownloadStage::for_status(state.persistent.status);

        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let shared = Arc::new(Shared {
            state: RwMutexed::new(state),
            pipeline: Mutexed::new(Pipeline {
                current,
                ..Pipeline::default()
            }),
            running: Event::new(),
            stopped: Event::new(),
            complete: Event::new(),
            done: Event::new(),
            token: parent_token.child_token(),
            mailbox: mailbox_tx,
            events: Publisher::with_capacity(EVENT_CAPACITY),
            store,
            registry,
            progress_interval,
        });
        if complete {
            shared.complete.set();
        }

        tokio::spawn(DownloadActor::new(shared.clone(), mailbox_rx).run());

        Download { shared }
    }

    /// This download's immutable ID.
    pub fn id(&self) -> DownloadId {
        self.shared.state.read_locked(|state| state.persistent.id.clone())
    }

    /// Thread-safe snapshot of the current state.
    pub fn state(&self) -> DownloadState {
        self.shared.state.get()
    }

    /// Ask the download to progress at least as far as `stage`.
    ///
    /// No synchronous result: consume events, or wait on
    /// [`running`](Download::running) / [`stopped`](Download::stopped).
    pub async fn start(&self, stage: DownloadStage) {
        self.command(DownloadMessage::Start(stage)).await;
    }

    /// Ask the download to cancel its active worker.
    pub async fn stop(&self) {
        self.command(DownloadMessage::Stop).await;
    }

    /// Replace the URL, resetting the download back to `new` (clearing
    /// provider, display name, error, and progress). Stops the active
    /// worker first, if any.
    pub async fn set_url(&self, url: impl Into<String>) {
        self.command(DownloadMessage::SetUrl(url.into())).await;
    }

    async fn command(&self, msg: DownloadMessage) {
        // The actor dropping its mailbox (on close) makes this a no-op,
        // matching commands being fire-and-forget.
        let _ = self.shared.mailbox.send(msg).await;
    }

    /// Resolves while a worker is active.
    pub async fn running(&self) {
        self.shared.running.wait().await;
    }

    /// Resolves while no worker is active.
    pub async fn stopped(&self) {
        self.shared.stopped.wait().await;
    }

    /// Resolves once the download has completed.
    pub async fn complete(&self) {
        self.shared.complete.wait().await;
    }

    /// Whether the download has completed. Useful after waiting on
    /// [`stopped`](Download::stopped).
    pub fn is_complete(&self) -> bool {
        self.shared.complete.is_set()
    }

    /// Whether a worker is currently active.
    pub fn is_running(&self) -> bool {
        self.shared.running.is_set()
    }

    /// Close the download: stop any worker, drain and close its event
    /// publisher, and wait for the actor to exit. Idempotent.
    pub async fn close(&self) {
        self.shared.token.cancel();
        self.shared.done.wait().await;
    }

    /// Resolves once the actor has fully shut down.
    pub async fn done(&self) {
        self.shared.done.wait().await;
    }

    /// The download's own event publisher; the session subscribes its
    /// aggregate publisher here.
    pub(crate) fn events(&self) -> &Publisher<DownloadEvent> {
        &self.shared.events
    }
}

impl Clone for Download {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NullStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use providers::{Provider, ProviderError, ResolvedSource, SourceInfo};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct InstantSource {
        url: String,
    }

    #[async_trait]
    impl Source for InstantSource {
        fn url(&self) -> &str {
            &self.url
        }

        fn display_name(&self) -> String {
            "instant".to_string()
        }

        async fn recon(
            &self,
            _token: CancellationToken,
        ) -> Result<Arc<dyn ResolvedSource>, ProviderError> {
            Ok(Arc::new(InstantResolved {
                info: SourceInfo {
                    id: String::new(),
                    title: "instant".to_string(),
                },
            }))
        }
    }

    struct InstantResolved {
        info: SourceInfo,
    }

    #[async_trait]
    impl ResolvedSource for InstantResolved {
        fn display_name(&self) -> String {
            self.info.title.clone()
        }

        fn info(&self) -> &SourceInfo {
            &self.info
        }

        async fn download(&self, sink: &transfer::Transfer) -> Result<(), ProviderError> {
            sink.add_expected_bytes(3);
            sink.save_stream("instant.bin", std::io::Cursor::new(vec![1u8, 2, 3]))
                .await?;
            Ok(())
        }
    }

    fn accepting_registry() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry
            .add(Provider::new(
                "instant",
                Arc::new(|input: &str| {
                    Ok(Arc::new(InstantSource {
                        url: input.to_string(),
                    }) as Arc<dyn Source>)
                }),
            ))
            .unwrap();
        Arc::new(registry)
    }

    fn fresh_state(url: &str, status: DownloadStatus, save_path: &std::path::Path) -> DownloadState {
        DownloadState {
            persistent: PersistentState {
                id: DownloadId::random(),
                url: url.to_string(),
                save_path: save_path.to_path_buf(),
                added_at: Utc::now(),
                status,
                error_message: String::new(),
                provider_name: String::new(),
                display_name: String::new(),
            },
            ephemeral: EphemeralState::default(),
        }
    }

    fn spawn(state: DownloadState, registry: Arc<ProviderRegistry>) -> Download {
        Download::spawn(
            state,
            &CancellationToken::new(),
            Arc::new(NullStore),
            registry,
            Duration::ZERO,
        )
    }

    async fn wait_for_status(download: &Download, status: DownloadStatus) {
        tokio::time::timeout(WAIT, async {
            while download.state().status() != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "timed out waiting for {status}, stuck at {}",
                download.state().status()
            )
        });
    }

    #[tokio::test]
    async fn exposes_state_snapshots_without_the_command_loop() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state("mock://a", DownloadStatus::New, dir.path());
        let download = spawn(state.clone(), accepting_registry());
        assert_eq!(download.state(), state);
        assert_eq!(download.id(), state.persistent.id);
        assert!(!download.is_running());
        download.close().await;
    }

    #[tokio::test]
    async fn runs_the_full_pipeline_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state("mock://a", DownloadStatus::New, dir.path());
        let download = spawn(state, accepting_registry());

        download.start(DownloadStage::Downloaded).await;
        tokio::time::timeout(WAIT, download.complete())
            .await
            .expect("download should complete");

        let state = download.state();
        assert_eq!(state.status(), DownloadStatus::Complete);
        assert_eq!(state.progress(), 100);
        assert_eq!(state.persistent.provider_name, "instant");
        assert_eq!(state.persistent.display_name, "instant");
        download.close().await;
    }

    #[tokio::test]
    async fn unmatched_url_lands_in_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state("mock://a", DownloadStatus::New, dir.path());
        // Empty registry: nothing matches.
        let download = spawn(state, Arc::new(ProviderRegistry::new()));

        download.start(DownloadStage::Downloaded).await;
        wait_for_status(&download, DownloadStatus::Error).await;
        assert!(!download.state().persistent.error_message.is_empty());
        assert!(!download.is_complete());
        download.close().await;
    }

    #[tokio::test]
    async fn set_url_resets_an_errored_download() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state("mock://bad", DownloadStatus::New, dir.path());
        let download = spawn(state, Arc::new(ProviderRegistry::new()));
        download.start(DownloadStage::Downloaded).await;
        wait_for_status(&download, DownloadStatus::Error).await;

        download.set_url("mock://better").await;
        wait_for_status(&download, DownloadStatus::New).await;
        let state = download.state();
        assert_eq!(state.url(), "mock://better");
        assert!(state.persistent.error_message.is_empty());
        assert_eq!(state.progress(), 0);
        download.close().await;
    }

    #[tokio::test]
    async fn rehydrated_complete_download_is_complete_at_birth() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = fresh_state("mock://a", DownloadStatus::Complete, dir.path());
        state.ephemeral.progress = 0; // ephemeral defaults are not persisted
        let download = spawn(state, accepting_registry());

        assert!(download.is_complete());
        assert_eq!(download.state().progress(), 100);

        // Nothing left to do: start must not spin up a worker.
        download.start(DownloadStage::Downloaded).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!download.is_running());
        download.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_concurrent_safe() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state("mock://a", DownloadStatus::New, dir.path());
        let download = spawn(state, accepting_registry());

        let other = download.clone();
        let first = tokio::spawn(async move { other.close().await });
        download.close().await;
        tokio::time::timeout(WAIT, first).await.unwrap().unwrap();
        download.close().await;
    }
}
