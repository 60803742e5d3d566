use thiserror::Error;

/// Errors surfaced by the pub/sub layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// The publisher has been closed; no new subscribers are accepted.
    #[error("publisher closed")]
    PublisherClosed,
}
