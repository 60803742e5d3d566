//! The per-download command loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{worker, DownloadMessage, DownloadStage, Shared};
use crate::session::DownloadEvent;
use crate::Error;

/// The active background worker, owned by the command loop.
struct ActiveWorker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a download's command loop. All lifecycle transitions (start, stop,
/// close, worker-finished) are serialized here, which is what upholds the
/// running/stopped invariants without a lock around them.
pub(crate) struct DownloadActor {
    shared: Arc<Shared>,
    mailbox: mpsc::Receiver<DownloadMessage>,
    finished_tx: mpsc::Sender<Option<Arc<Error>>>,
    finished_rx: mpsc::Receiver<Option<Arc<Error>>>,
    active: Option<ActiveWorker>,
}

impl DownloadActor {
    pub(crate) fn new(shared: Arc<Shared>, mailbox: mpsc::Receiver<DownloadMessage>) -> Self {
        // One active worker at a time, so a buffer of one means the worker
        // never waits to deliver its report.
        let (finished_tx, finished_rx) = mpsc::channel(1);
        Self {
            shared,
            mailbox,
            finished_tx,
            finished_rx,
            active: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.shared.stopped.set();
        debug!(id = %self.id(), "download actor started");

        loop {
            tokio::select! {
                // Download closed (or an ancestor context cancelled).
                _ = self.shared.token.cancelled() => {
                    self.close().await;
                    return;
                }
                // The background worker reported in.
                Some(result) = self.finished_rx.recv() => {
                    self.stop(result).await;
                }
                msg = self.mailbox.recv() => match msg {
                    Some(DownloadMessage::Start(stage)) => self.start(stage).await,
                    Some(DownloadMessage::Stop) => self.stop(None).await,
                    Some(DownloadMessage::SetUrl(url)) => self.set_url(url).await,
                    // Every handle dropped; nothing can command us anymore.
                    None => {
                        self.close().await;
                        return;
                    }
                },
            }
        }
    }

    fn id(&self) -> super::DownloadId {
        self.shared.state.read_locked(|s| s.persistent.id.clone())
    }

    async fn close(&mut self) {
        debug!(id = %self.id(), "download closing");
        self.stop(None).await;
        self.shared.events.close().await;
        self.shared.done.set();
    }

    async fn start(&mut self, stage: DownloadStage) {
        let (target, current) = self.shared.pipeline.locked(|p| {
            p.target = p.target.max(stage);
            (p.target, p.current)
        });
        if target <= current {
            // Everything asked for has already been done; no worker needed.
            return;
        }
        if !self.shared.stopped.clear() {
            // Already running (or being started); the active worker observes
            // the raised target stage at its next stage boundary.
            return;
        }

        let worker_token = self.shared.token.child_token();
        let handle = tokio::spawn(worker::run(
            self.shared.clone(),
            worker_token.clone(),
            self.finished_tx.clone(),
        ));
        self.active = Some(ActiveWorker {
            token: worker_token,
            handle,
        });
        self.shared.running.set();
        info!(id = %self.id(), ?target, "download started");
        let download = self.download();
        self.shared
            .events
            .send(DownloadEvent::Started { download })
            .await;
    }

    async fn stop(&mut self, err: Option<Arc<Error>>) {
        self.shared
            .pipeline
            .locked(|p| p.target = DownloadStage::Undefined);
        if !self.shared.running.clear() {
            // Not running (or already stopping); nothing to do.
            return;
        }

        if let Some(active) = self.active.take() {
            active.token.cancel();
            let _ = active.handle.await;
        }
        // The worker is gone now; discard any report it left behind so a
        // later run isn't stopped by a stale result.
        while self.finished_rx.try_recv().is_ok() {}

        if let Some(err) = err.as_ref() {
            let message = err.to_string();
            info!(id = %self.id(), error = %message, "download failed");
            self.shared
                .update_state(|state| {
                    state.persistent.status = super::DownloadStatus::Error;
                    state.persistent.error_message = message.clone();
                })
                .await;
        } else {
            // A clean stop regresses any running status to where it would
            // restart from.
            self.shared
                .update_state(|state| {
                    state.persistent.status = state.persistent.status.non_running();
                })
                .await;
        }

        self.shared.stopped.set();
        info!(id = %self.id(), "download stopped");
        let download = self.download();
        self.shared
            .events
            .send(DownloadEvent::Stopped {
                download,
                error: err,
            })
            .await;
    }

    async fn set_url(&mut self, url: String) {
        self.stop(None).await;
        self.shared.pipeline.locked(|p| {
            p.target = DownloadStage::Undefined;
            p.current = DownloadStage::Undefined;
            p.source = None;
            p.resolved = None;
        });
        self.shared.complete.clear();
        self.shared
            .update_state(|state| {
                state.persistent.url = url;
                state.persistent.status = super::DownloadStatus::New;
                state.persistent.provider_name.clear();
                state.persistent.display_name.clear();
                state.persistent.error_message.clear();
                state.ephemeral.progress = 0;
            })
            .await;
    }

    fn download(&self) -> super::Download {
        super::Download {
            shared: self.shared.clone(),
        }
    }
}
