//! Close-safe bounded channel.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::SenderCloser;

/// A bounded channel whose close semantics are stronger than the raw
/// primitives: sending to a closed channel returns `false` instead of
/// faulting, closing is idempotent and safe against concurrent sends, and
/// messages accepted before the close remain receivable.
///
/// `Channel` is a cheap cloneable handle; all clones share the same queue.
/// Receiving is serialized internally, so the channel behaves as having one
/// logical consumer.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    // Taken (dropped) on close, behind a write lock so closers exclude new
    // senders from starting. In-flight senders hold transient clones, which
    // keeps the queue open until they finish; the receiver observes
    // end-of-stream only after every accepted message is in.
    tx: RwLock<Option<mpsc::Sender<T>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    // Stands in for a `done` signal: in-flight senders race against it so
    // they abort rather than deliver into a closing queue.
    done: CancellationToken,
}

impl<T: Send + 'static> Channel<T> {
    /// Create a channel with the given buffer capacity.
    ///
    /// The capacity is clamped to at least 1; there are no rendezvous
    /// channels here, so a send can succeed slightly before the message is
    /// received.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx: RwLock::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                done: CancellationToken::new(),
            }),
        }
    }

    /// Send a message, waiting for buffer space.
    ///
    /// Returns `true` on success, `false` if the channel is (or becomes)
    /// closed. A send racing a close may either deliver or abort.
    pub async fn send(&self, msg: T) -> bool {
        let tx = match self.inner.tx.read().as_ref() {
            Some(tx) => tx.clone(),
            None => return false,
        };
        tokio::select! {
            res = tx.send(msg) => res.is_ok(),
            _ = self.inner.done.cancelled() => false,
        }
    }

    /// Send a message without waiting.
    ///
    /// Returns `false` only if the channel is closed. When the buffer is
    /// full the message is dropped but still reported as accepted; this is
    /// the saturation-drop primitive for rate-limited progress publishing.
    pub fn try_send(&self, msg: T) -> bool {
        match self.inner.tx.read().as_ref() {
            Some(tx) => !matches!(tx.try_send(msg), Err(mpsc::error::TrySendError::Closed(_))),
            None => false,
        }
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the channel is closed and the buffer is drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.rx.lock().await.recv().await
    }

    /// Close the channel. Idempotent.
    ///
    /// New sends fail immediately; in-flight sends abort or deliver (racy);
    /// already-buffered messages stay receivable.
    pub fn close(&self) {
        self.inner.done.cancel();
        drop(self.inner.tx.write().take());
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Wait until the channel is closed.
    pub async fn closed(&self) {
        self.inner.done.cancelled().await;
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.inner.done.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> SenderCloser<T> for Channel<T> {
    async fn send(&self, msg: T) -> bool {
        Channel::send(self, msg).await
    }

    async fn close(&self) {
        Channel::close(self);
    }

    fn is_closed(&self) -> bool {
        Channel::is_closed(self)
    }
}
