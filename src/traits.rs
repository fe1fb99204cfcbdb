use crate::model::Event;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Event consumer is gone")]
    Closed,
}

/// Append-only consumer of harvested events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes a single event. Called once per harvested line, never batched.
    async fn publish(&self, event: Event) -> Result<(), SinkError>;
}
