//! PV and UV counting stages and the sink consumer
//!
//! Each stage is a small actor owning its input receiver. Stages stop once
//! their input queue is closed and drained, so shutting the tailer down
//! flushes everything already accepted through to the sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DedupFailurePolicy;
use crate::dedup::DedupStore;
use crate::models::{CounterDirective, CounterType, ParsedEvent, TimeGranularity};
use crate::pipeline::stats::PipelineStats;
use crate::sink::StorageSink;

/// Counts every arriving event
pub struct PvCounter {
    pub(crate) receiver: mpsc::Receiver<ParsedEvent>,
    pub(crate) directives: mpsc::Sender<CounterDirective>,
    pub(crate) granularity: TimeGranularity,
    pub(crate) stats: Arc<PipelineStats>,
}

impl PvCounter {
    pub async fn run(mut self) {
        while let Some(parsed) = self.receiver.recv().await {
            let directive =
                CounterDirective::increment(CounterType::Pv, parsed.record, self.granularity);
            if self.directives.send(directive).await.is_err() {
                warn!("Sink queue closed, stopping PV counter");
                break;
            }
            PipelineStats::incr(&self.stats.pv_emitted);
        }
        debug!("PV counter finished");
    }
}

/// What the dedup store said about one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvOutcome {
    /// Visitor not seen within the window
    New,
    /// Visitor already counted within the window
    Duplicate,
    /// Store call failed; resolved by the failure policy
    StoreFailed,
}

/// Settings for the UV counter's dedup protocol
#[derive(Debug, Clone)]
pub struct UvSettings {
    pub key_prefix: String,
    pub ttl: Duration,
    pub failure_policy: DedupFailurePolicy,
    pub granularity: TimeGranularity,
}

/// Counts events whose visitor is new to the dedup store
pub struct UvCounter {
    pub(crate) receiver: mpsc::Receiver<ParsedEvent>,
    pub(crate) directives: mpsc::Sender<CounterDirective>,
    pub(crate) store: Arc<dyn DedupStore>,
    pub(crate) settings: UvSettings,
    pub(crate) stats: Arc<PipelineStats>,
}

/// Dedup set key for a referrer
pub fn dedup_key(prefix: &str, referrer: &str) -> String {
    format!("{}{}", prefix, referrer)
}

/// Ask the store whether the event's visitor is new
pub async fn check_visitor(
    store: &dyn DedupStore,
    settings: &UvSettings,
    parsed: &ParsedEvent,
) -> UvOutcome {
    let key = dedup_key(&settings.key_prefix, &parsed.event.referrer);
    match store
        .add_if_absent(&key, parsed.visitor.as_str(), settings.ttl)
        .await
    {
        Ok(true) => UvOutcome::New,
        Ok(false) => UvOutcome::Duplicate,
        Err(e) => {
            warn!(key = %key, error = %e, "UV dedup store call failed");
            UvOutcome::StoreFailed
        }
    }
}

impl UvSettings {
    /// Whether an outcome produces a uv increment
    pub fn counts(&self, outcome: UvOutcome) -> bool {
        match outcome {
            UvOutcome::New => true,
            UvOutcome::Duplicate => false,
            UvOutcome::StoreFailed => self.failure_policy == DedupFailurePolicy::FailOpen,
        }
    }
}

impl UvCounter {
    pub async fn run(mut self) {
        while let Some(parsed) = self.receiver.recv().await {
            let outcome = check_visitor(self.store.as_ref(), &self.settings, &parsed).await;
            match outcome {
                UvOutcome::Duplicate => PipelineStats::incr(&self.stats.uv_duplicates),
                UvOutcome::StoreFailed => PipelineStats::incr(&self.stats.dedup_errors),
                UvOutcome::New => {}
            }

            if !self.settings.counts(outcome) {
                continue;
            }

            let directive =
                CounterDirective::increment(CounterType::Uv, parsed.record, self.settings.granularity);
            if self.directives.send(directive).await.is_err() {
                warn!("Sink queue closed, stopping UV counter");
                break;
            }
            PipelineStats::incr(&self.stats.uv_emitted);
        }
        debug!("UV counter finished");
    }
}

/// Feeds directives to the storage sink one at a time
pub struct SinkConsumer {
    pub(crate) receiver: mpsc::Receiver<CounterDirective>,
    pub(crate) sink: Arc<dyn StorageSink>,
    pub(crate) stats: Arc<PipelineStats>,
}

impl SinkConsumer {
    pub async fn run(mut self) {
        while let Some(directive) = self.receiver.recv().await {
            let counter_type = directive.counter_type();
            match self.sink.accept(directive).await {
                Ok(()) => PipelineStats::incr(&self.stats.sink_accepted),
                Err(e) => {
                    PipelineStats::incr(&self.stats.sink_errors);
                    warn!(counter = %counter_type, error = %e, "Sink rejected directive");
                }
            }
        }
        info!("Sink consumer drained");
    }
}
