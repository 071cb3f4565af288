//! In-memory sink aggregating directives ZINCRBY-style

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{CounterDirective, CounterType};
use crate::sink::{SinkResult, StorageSink};

/// Aggregate key: one sorted-set score per counter, route and time bucket
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SinkKey {
    pub counter_type: CounterType,
    pub route: String,
    pub time_bucket: Option<i64>,
}

#[derive(Default)]
pub struct MemorySink {
    scores: DashMap<SinkKey, u64>,
    received: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of a single (counter, route, bucket) cell
    pub fn score(&self, counter_type: CounterType, route: &str, time_bucket: Option<i64>) -> u64 {
        let key = SinkKey {
            counter_type,
            route: route.to_string(),
            time_bucket,
        };
        self.scores.get(&key).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// Sum of a route's scores over all buckets
    pub fn total(&self, counter_type: CounterType, route: &str) -> u64 {
        self.scores
            .iter()
            .filter(|entry| entry.key().counter_type == counter_type && entry.key().route == route)
            .map(|entry| *entry.value())
            .sum()
    }

    /// Number of directives accepted so far
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// All cells, sorted by score descending
    pub fn snapshot(&self) -> Vec<(SinkKey, u64)> {
        let mut result: Vec<(SinkKey, u64)> = self
            .scores
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        result.sort_by(|a, b| b.1.cmp(&a.1));
        result
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn accept(&self, directive: CounterDirective) -> SinkResult<()> {
        let amount = directive.operation.amount;
        let key = SinkKey {
            counter_type: directive.counter_type(),
            route: directive.operation.route,
            time_bucket: directive.operation.time_bucket,
        };

        self.scores
            .entry(key)
            .and_modify(|score| *score += amount)
            .or_insert(amount);
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
