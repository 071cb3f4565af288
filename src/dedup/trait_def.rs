use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unexpected reply: {0}")]
    InvalidReply(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type DedupResult<T> = Result<T, DedupError>;

/// Approximate set membership with expiry, used to deduplicate visitors
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Add `member` to the set at `key`, keeping it for `ttl`
    ///
    /// Returns `true` when the member was newly added and `false` when it was
    /// already present within the window.
    async fn add_if_absent(&self, key: &str, member: &str, ttl: Duration) -> DedupResult<bool>;

    /// Liveness probe
    async fn ping(&self) -> DedupResult<()>;
}
