//! In-process dedup store backed by a Moka cache with per-entry expiry

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

use crate::dedup::{DedupResult, DedupStore};

/// Each entry stores its own time-to-live as the value
struct EntryTtl;

impl Expiry<(String, String), Duration> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &(String, String),
        value: &Duration,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(*value)
    }
}

/// Exact (non-probabilistic) TTL set, suitable for a single process and tests
pub struct MemoryDedupStore {
    members: Cache<(String, String), Duration>,
}

impl MemoryDedupStore {
    pub fn new(max_entries: u64) -> Self {
        let members = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();

        Self { members }
    }

    /// Number of live members across all keys (approximate while evictions are pending)
    pub fn entry_count(&self) -> u64 {
        self.members.entry_count()
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn add_if_absent(&self, key: &str, member: &str, ttl: Duration) -> DedupResult<bool> {
        let entry = self
            .members
            .entry((key.to_string(), member.to_string()))
            .or_insert(ttl)
            .await;

        Ok(entry.is_fresh())
    }

    async fn ping(&self) -> DedupResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const DAY: Duration = Duration::from_secs(86400);

    #[tokio::test]
    async fn test_add_if_absent() {
        let store = MemoryDedupStore::default();

        assert!(store.add_if_absent("uv_hpll_a", "v1", DAY).await.unwrap());
        assert!(!store.add_if_absent("uv_hpll_a", "v1", DAY).await.unwrap());
        assert!(store.add_if_absent("uv_hpll_a", "v2", DAY).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryDedupStore::default();

        assert!(store.add_if_absent("uv_hpll_a", "v1", DAY).await.unwrap());
        assert!(store.add_if_absent("uv_hpll_b", "v1", DAY).await.unwrap());
    }

    #[tokio::test]
    async fn test_member_expires_after_ttl() {
        let store = MemoryDedupStore::default();
        let ttl = Duration::from_millis(50);

        assert!(store.add_if_absent("k", "v", ttl).await.unwrap());
        sleep(Duration::from_millis(300)).await;
        assert!(store.add_if_absent("k", "v", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_ping() {
        assert!(MemoryDedupStore::default().ping().await.is_ok());
    }
}
