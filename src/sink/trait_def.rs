use async_trait::async_trait;
use thiserror::Error;

use crate::models::CounterDirective;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize directive: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to write directive: {0}")]
    Io(#[from] std::io::Error),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Receives counter increments; merging them into time-bucketed
/// aggregates is entirely the sink's business.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn accept(&self, directive: CounterDirective) -> SinkResult<()>;
}
