//! Publish/subscribe building blocks.
//!
//! The primitive everything here builds on is [`Channel`]: a bounded queue
//! with close semantics strong enough that "send to a closed endpoint" is a
//! normal, racy `false` return instead of a fault. On top of it sit:
//!
//! - [`Publisher`]: fan-out to a dynamic set of subscribers, with ordered
//!   per-subscriber delivery, drop-on-fail unsubscription, and a draining
//!   close;
//! - [`Pipe`]: a 1→1 bridge with linked-close options;
//! - [`Merger`]: an N→1 fan-in with coordinated close;
//! - [`FilteredSender`]: a predicate wrapper around any subscriber
//!   endpoint.

mod channel;
mod error;
mod filtered;
mod merger;
mod pipe;
mod publisher;

pub use channel::Channel;
pub use error::PubSubError;
pub use filtered::FilteredSender;
pub use merger::Merger;
pub use pipe::{Pipe, PipeOptions};
pub use publisher::{Publisher, DEFAULT_PUBLISHER_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY};

use async_trait::async_trait;

/// A subscriber endpoint: anything that can accept messages and be closed.
///
/// `send` returns `false` only when the endpoint is closed; a [`Publisher`]
/// treats that as the signal to unsubscribe it.
#[async_trait]
pub trait SenderCloser<T: Send + 'static>: Send + Sync {
    /// Deliver a message, returning `false` if the endpoint is closed.
    async fn send(&self, msg: T) -> bool;

    /// Close the endpoint. Idempotent.
    async fn close(&self);

    /// Whether the endpoint has been closed.
    fn is_closed(&self) -> bool;
}
