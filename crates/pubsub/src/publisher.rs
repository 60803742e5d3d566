//! Fan-out publisher with dynamic subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use sync_utils::Mutexed;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::{Channel, PubSubError, SenderCloser};

/// Default capacity of a publisher's input channel.
pub const DEFAULT_PUBLISHER_CAPACITY: usize = 1;

/// Default capacity of a subscription created via [`Publisher::subscribe`].
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1;

/// A fan-out bus: publish once, deliver to every current subscriber.
///
/// A single dispatcher task reads the input channel and offers each message
/// to every registered subscriber in turn, so any one subscriber observes
/// messages in publish order. A subscriber whose `send` returns `false` is
/// closed and gets dropped from the set; the others are unaffected.
///
/// [`close`](Publisher::close) drains: the input is closed, the dispatcher
/// finishes delivering everything already accepted, and then every
/// subscriber registered with the close-with-publisher flag is closed.
pub struct Publisher<T> {
    inner: Arc<Inner<T>>,
}

struct Subscription<T> {
    sender: Arc<dyn SenderCloser<T>>,
    close_with_publisher: bool,
}

struct Inner<T> {
    input: Channel<T>,
    subscribers: Mutexed<Vec<Subscription<T>>>,
    dispatcher: Mutexed<Option<JoinHandle<()>>>,
    // Serializes close against subscriber registration, so a subscriber is
    // either rejected with `PublisherClosed` or guaranteed to be swept by
    // the close.
    lifecycle: tokio::sync::Mutex<bool>,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Create a publisher with the default input capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PUBLISHER_CAPACITY)
    }

    /// Create a publisher with the given input capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let inner = Arc::new(Inner {
            input: Channel::new(capacity),
            subscribers: Mutexed::new(Vec::new()),
            dispatcher: Mutexed::new(None),
            lifecycle: tokio::sync::Mutex::new(false),
        });
        let handle = tokio::spawn(Self::dispatch(inner.clone()));
        inner.dispatcher.set(Some(handle));
        Self { inner }
    }

    async fn dispatch(inner: Arc<Inner<T>>) {
        while let Some(msg) = inner.input.recv().await {
            // Snapshot the set so delivery doesn't hold the lock that
            // `add_subscriber` needs.
            let subscribers: Vec<Arc<dyn SenderCloser<T>>> = inner
                .subscribers
                .locked(|subs| subs.iter().map(|s| s.sender.clone()).collect());
            for subscriber in subscribers {
                if !subscriber.send(msg.clone()).await {
                    trace!("subscriber closed, unsubscribing");
                    inner
                        .subscribers
                        .locked(|subs| subs.retain(|s| !Arc::ptr_eq(&s.sender, &subscriber)));
                }
            }
        }
    }

    /// Publish a message, waiting for space on the input channel.
    ///
    /// Returns `false` if the publisher is closed.
    pub async fn send(&self, msg: T) -> bool {
        self.inner.input.send(msg).await
    }

    /// Publish a message without waiting.
    ///
    /// When the input channel is saturated the message is dropped but still
    /// reported as accepted; `false` means the publisher is closed. This is
    /// the path for high-rate updates where losing intermediate values is
    /// acceptable.
    pub fn try_send(&self, msg: T) -> bool {
        self.inner.input.try_send(msg)
    }

    /// Register a subscriber endpoint.
    ///
    /// With `close_with_publisher` set, the subscriber is closed when the
    /// publisher closes; otherwise it outlives the publisher.
    pub async fn add_subscriber(
        &self,
        sender: Arc<dyn SenderCloser<T>>,
        close_with_publisher: bool,
    ) -> Result<(), PubSubError> {
        let closed = self.inner.lifecycle.lock().await;
        if *closed {
            return Err(PubSubError::PublisherClosed);
        }
        self.inner.subscribers.locked(|subs| {
            subs.push(Subscription {
                sender,
                close_with_publisher,
            })
        });
        Ok(())
    }

    /// Subscribe with the default capacity.
    pub async fn subscribe(&self) -> Result<Channel<T>, PubSubError> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY).await
    }

    /// Subscribe with an explicit queue capacity.
    ///
    /// The returned channel is registered with the close-with-publisher
    /// flag, so it yields `None` once the publisher closes and drains.
    pub async fn subscribe_with_capacity(
        &self,
        capacity: usize,
    ) -> Result<Channel<T>, PubSubError> {
        let channel = Channel::new(capacity);
        self.add_subscriber(Arc::new(channel.clone()), true).await?;
        Ok(channel)
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.locked(|subs| subs.len())
    }

    /// Close the publisher. Idempotent.
    ///
    /// Closes the input, waits for the dispatcher to deliver every accepted
    /// message, then closes the subscribers registered with the
    /// close-with-publisher flag.
    pub async fn close(&self) {
        let mut closed = self.inner.lifecycle.lock().await;
        if *closed {
            return;
        }
        self.inner.input.close();
        if let Some(handle) = self.inner.dispatcher.locked(|d| d.take()) {
            let _ = handle.await;
        }
        let subscribers = self.inner.subscribers.take();
        for subscription in subscribers {
            if subscription.close_with_publisher {
                subscription.sender.close().await;
            }
        }
        *closed = true;
    }

    /// Whether the publisher has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.input.is_closed()
    }
}

impl<T: Clone + Send + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("closed", &self.inner.input.is_closed())
            .finish()
    }
}

// A publisher is itself a subscriber endpoint, which is how one publisher
// aggregates another: subscribe the downstream publisher to the upstream one
// (typically without the close-with-publisher flag, so each closes
// independently).
#[async_trait]
impl<T: Clone + Send + 'static> SenderCloser<T> for Publisher<T> {
    async fn send(&self, msg: T) -> bool {
        Publisher::send(self, msg).await
    }

    async fn close(&self) {
        Publisher::close(self).await;
    }

    fn is_closed(&self) -> bool {
        Publisher::is_closed(self)
    }
}
