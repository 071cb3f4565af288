use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all stages of a running pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) lines_read: AtomicU64,
    pub(crate) events_parsed: AtomicU64,
    pub(crate) empty_records: AtomicU64,
    pub(crate) dropped_records: AtomicU64,
    pub(crate) pv_emitted: AtomicU64,
    pub(crate) uv_emitted: AtomicU64,
    pub(crate) uv_duplicates: AtomicU64,
    pub(crate) dedup_errors: AtomicU64,
    pub(crate) sink_accepted: AtomicU64,
    pub(crate) sink_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub events_parsed: u64,
    pub empty_records: u64,
    pub dropped_records: u64,
    pub pv_emitted: u64,
    pub uv_emitted: u64,
    pub uv_duplicates: u64,
    pub dedup_errors: u64,
    pub sink_accepted: u64,
    pub sink_errors: u64,
}

impl PipelineStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            lines_read: load(&self.lines_read),
            events_parsed: load(&self.events_parsed),
            empty_records: load(&self.empty_records),
            dropped_records: load(&self.dropped_records),
            pv_emitted: load(&self.pv_emitted),
            uv_emitted: load(&self.uv_emitted),
            uv_duplicates: load(&self.uv_duplicates),
            dedup_errors: load(&self.dedup_errors),
            sink_accepted: load(&self.sink_accepted),
            sink_errors: load(&self.sink_errors),
        }
    }
}
