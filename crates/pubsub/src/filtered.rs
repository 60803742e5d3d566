//! Predicate wrapper around a subscriber endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::SenderCloser;

/// Wraps a subscriber endpoint with a predicate.
///
/// Messages failing the predicate are silently dropped but still reported
/// as accepted, so a publisher does not mistake the filter for a closed
/// subscriber and unsubscribe it.
pub struct FilteredSender<T> {
    inner: Arc<dyn SenderCloser<T>>,
    filter: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> FilteredSender<T> {
    pub fn new(
        inner: Arc<dyn SenderCloser<T>>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            filter: Box::new(filter),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> SenderCloser<T> for FilteredSender<T> {
    async fn send(&self, msg: T) -> bool {
        if self.inner.is_closed() {
            return false;
        }
        if (self.filter)(&msg) {
            self.inner.send(msg).await
        } else {
            // Accepted but dropped: the endpoint is open, it just doesn't
            // want this message.
            true
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Channel, Publisher};

    #[tokio::test]
    async fn passes_matching_messages() {
        let channel = Channel::new(8);
        let filtered = FilteredSender::new(Arc::new(channel.clone()), |v: &u32| v % 2 == 0);
        assert!(filtered.send(2).await);
        assert!(filtered.send(3).await);
        assert!(filtered.send(4).await);
        assert_eq!(channel.recv().await, Some(2));
        assert_eq!(channel.recv().await, Some(4));
    }

    #[tokio::test]
    async fn reports_closed_endpoint() {
        let channel = Channel::new(1);
        let filtered = FilteredSender::new(Arc::new(channel.clone()), |_: &u32| true);
        channel.close();
        assert!(!filtered.send(1).await);
    }

    #[tokio::test]
    async fn filtered_subscriber_stays_subscribed() {
        let publisher = Publisher::new();
        let channel = Channel::new(8);
        let filtered = FilteredSender::new(Arc::new(channel.clone()), |v: &u32| *v >= 10);
        publisher
            .add_subscriber(Arc::new(filtered), true)
            .await
            .unwrap();

        for v in [1u32, 2, 10, 3, 20] {
            assert!(publisher.send(v).await);
        }
        assert_eq!(channel.recv().await, Some(10));
        assert_eq!(channel.recv().await, Some(20));
        // Dropped messages did not get the subscriber removed.
        assert_eq!(publisher.subscriber_count(), 1);
        publisher.close().await;
    }
}
