//! N→1 channel fan-in with coordinated close.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::Channel;

/// Default capacity of a merger's output channel.
pub const DEFAULT_MERGER_CAPACITY: usize = 1;

/// Funnels any number of sources into a single output channel.
///
/// Each source gets a forwarder task; per-source FIFO order is preserved,
/// ordering between sources is not. Closing the merger stops accepting
/// sources, cancels and waits for every forwarder, and closes the sources
/// it owns.
pub struct Merger<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    out: Channel<T>,
    done: CancellationToken,
    forwarders: TaskTracker,
    closed: Mutex<bool>,
}

impl<T: Send + 'static> Merger<T> {
    /// Create a merger with the default output capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MERGER_CAPACITY)
    }

    /// Create a merger with the given output capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                out: Channel::new(capacity),
                done: CancellationToken::new(),
                forwarders: TaskTracker::new(),
                closed: Mutex::new(false),
            }),
        }
    }

    /// Add a closeable source. Returns `false` if the merger is closed.
    ///
    /// The source is closed when its forwarder exits, whether because the
    /// source drained or because the merger closed.
    pub fn add(&self, source: Channel<T>) -> bool {
        let closed = self.inner.closed.lock();
        if *closed {
            return false;
        }
        let inner = self.inner.clone();
        self.inner.forwarders.spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.done.cancelled() => break,
                    msg = source.recv() => match msg {
                        Some(msg) => {
                            if !inner.out.send(msg).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            source.close();
        });
        true
    }

    /// Add a raw queue as a source. Returns `false` if the merger is closed.
    pub fn add_receiver(&self, mut source: mpsc::Receiver<T>) -> bool {
        let closed = self.inner.closed.lock();
        if *closed {
            return false;
        }
        let inner = self.inner.clone();
        self.inner.forwarders.spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.done.cancelled() => break,
                    msg = source.recv() => match msg {
                        Some(msg) => {
                            if !inner.out.send(msg).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        true
    }

    /// Receive the next merged message; `None` once the merger is closed
    /// and drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.out.recv().await
    }

    /// Close the merger. Idempotent.
    ///
    /// No new sources are accepted, forwarders are cancelled and awaited,
    /// and owned sources are closed as their forwarders exit.
    pub async fn close(&self) {
        {
            let mut closed = self.inner.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
        }
        self.inner.done.cancel();
        self.inner.out.close();
        self.inner.forwarders.close();
        self.inner.forwarders.wait().await;
    }

    /// Whether the merger has been closed.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock()
    }
}

impl<T: Send + 'static> Default for Merger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Merger<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
