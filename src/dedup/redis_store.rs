//! Redis HyperLogLog dedup store

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

use crate::dedup::{DedupError, DedupResult, DedupStore};

/// Dedup store using `PFADD` + `EXPIRE` on a shared connection
///
/// The connection manager re-establishes the connection after Redis drops
/// it, so calls fail only while the server is unreachable.
pub struct RedisDedupStore {
    connection: ConnectionManager,
}

impl RedisDedupStore {
    pub async fn connect(url: &str) -> DedupResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| DedupError::Connection(format!("Failed to create Redis client: {}", e)))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| DedupError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection })
    }
}

/// PFADD the member and refresh the key's expiry in one transaction
pub(crate) fn add_pipeline(key: &str, member: &str, ttl: Duration) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("PFADD")
        .arg(key)
        .arg(member)
        .cmd("EXPIRE")
        .arg(key)
        .arg(ttl.as_secs().max(1))
        .ignore();
    pipe
}

/// PFADD replies 1 when the HyperLogLog changed and 0 otherwise
pub(crate) fn interpret_pfadd(reply: i64) -> DedupResult<bool> {
    match reply {
        1 => Ok(true),
        0 => Ok(false),
        other => Err(DedupError::InvalidReply(format!("PFADD returned {}", other))),
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn add_if_absent(&self, key: &str, member: &str, ttl: Duration) -> DedupResult<bool> {
        let mut conn = self.connection.clone();
        let (reply,): (i64,) = add_pipeline(key, member, ttl)
            .query_async(&mut conn)
            .await?;

        debug!("[Redis] PFADD {} {} -> {}", key, member, reply);
        interpret_pfadd(reply)
    }

    async fn ping(&self) -> DedupResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_commands() {
        let pipe = add_pipeline("uv_hpll_http://ref.com", "abc", Duration::from_secs(86400));
        let packed = String::from_utf8_lossy(&pipe.get_packed_pipeline()).to_string();

        assert!(packed.contains("MULTI"));
        assert!(packed.contains("PFADD"));
        assert!(packed.contains("uv_hpll_http://ref.com"));
        assert!(packed.contains("EXPIRE"));
        assert!(packed.contains("86400"));
        assert!(packed.contains("EXEC"));
    }

    #[test]
    fn test_ttl_never_zero() {
        let pipe = add_pipeline("k", "m", Duration::from_millis(10));
        let packed = String::from_utf8_lossy(&pipe.get_packed_pipeline()).to_string();
        assert!(packed.contains("$1\r\n1\r\n"));
    }

    #[test]
    fn test_interpret_pfadd() {
        assert!(interpret_pfadd(1).unwrap());
        assert!(!interpret_pfadd(0).unwrap());
        assert!(matches!(interpret_pfadd(5), Err(DedupError::InvalidReply(_))));
    }

    // Compile-time check that calls go through the reconnecting manager
    #[allow(dead_code)]
    fn shared_connection(store: &RedisDedupStore) -> ConnectionManager {
        store.connection.clone()
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisDedupStore::connect("not a url").await;
        assert!(matches!(result, Err(DedupError::Connection(_))));
    }
}
