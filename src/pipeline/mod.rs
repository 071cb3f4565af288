//! Ingestion and aggregation pipeline
//!
//! ```text
//! LogTailer -> Dispatcher -> ParserWorker (xW) -> { PvCounter, UvCounter } -> SinkConsumer
//!                                                              |
//!                                                         DedupStore
//! ```
//!
//! Every stage runs as its own task and talks to its neighbours only through
//! bounded queues sized to the worker count. Stopping the pipeline signals the
//! tailer; the remaining stages drain their queues and exit as their inputs
//! close.

pub mod counters;
pub mod dispatcher;
pub mod error;
pub mod parser;
pub mod probe;
pub mod stats;
pub mod tailer;

pub use counters::{UvOutcome, UvSettings};
pub use dispatcher::{line_queue, DispatchClosed, Dispatcher, LineReceiver};
pub use error::{PipelineError, TailError};
pub use stats::{PipelineStats, StatsSnapshot};
pub use tailer::{LogTailer, TailerConfig};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::config::{Config, EmptyRecordPolicy};
use crate::dedup::DedupStore;
use crate::models::TimeGranularity;
use crate::sink::StorageSink;
use counters::{PvCounter, SinkConsumer, UvCounter};
use dispatcher::WorkerOutputs;

/// Everything needed to start a pipeline, independent of where it came from
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub tailer: TailerConfig,
    pub workers: usize,
    pub uv: UvSettings,
    pub empty_records: EmptyRecordPolicy,
    pub granularity: TimeGranularity,
    pub probe_interval: Duration,
    pub drain_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        let workers = config.source.workers.max(1);
        let granularity = config.counting.time_bucket;

        Self {
            tailer: TailerConfig {
                path: config.source.path.clone().into(),
                poll_interval: Duration::from_millis(config.source.poll_interval_ms),
                start_at_end: config.source.start_at_end,
                open_retries: config.source.open_retries,
                open_backoff: Duration::from_millis(config.source.open_backoff_ms),
                progress_every: 1000 * workers as u64,
            },
            workers,
            uv: UvSettings {
                key_prefix: config.dedup.key_prefix.clone(),
                ttl: Duration::from_secs(config.dedup.ttl_secs),
                failure_policy: config.counting.dedup_failure,
                granularity,
            },
            empty_records: config.counting.empty_records,
            granularity,
            probe_interval: Duration::from_secs(config.dedup.probe_interval_secs.max(1)),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        }
    }
}

/// Cloneable trigger for a graceful stop
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn signal(&self) {
        self.0.send_replace(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A running pipeline
pub struct Pipeline {
    shutdown: ShutdownHandle,
    tailer: JoinHandle<Result<(), TailError>>,
    stages: Vec<JoinHandle<()>>,
    probe: JoinHandle<()>,
    stats: Arc<PipelineStats>,
    drain_timeout: Duration,
}

impl Pipeline {
    /// Spawn every stage on the current runtime
    ///
    /// Tasks inherit the caller's current tracing subscriber.
    pub fn start(
        options: PipelineOptions,
        store: Arc<dyn DedupStore>,
        sink: Arc<dyn StorageSink>,
    ) -> Self {
        let workers = options.workers.max(1);
        let stats = Arc::new(PipelineStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (dispatcher, lines) = line_queue(workers);
        let (pv_tx, pv_rx) = mpsc::channel(workers);
        let (uv_tx, uv_rx) = mpsc::channel(workers);
        let (directive_tx, directive_rx) = mpsc::channel(workers);

        info!(
            path = %options.tailer.path.display(),
            workers,
            empty_records = ?options.empty_records,
            dedup_failure = ?options.uv.failure_policy,
            "Starting pipeline"
        );

        let mut stages = Vec::with_capacity(workers + 3);

        stages.push(tokio::spawn(
            SinkConsumer {
                receiver: directive_rx,
                sink,
                stats: Arc::clone(&stats),
            }
            .run()
            .with_current_subscriber(),
        ));
        stages.push(tokio::spawn(
            PvCounter {
                receiver: pv_rx,
                directives: directive_tx.clone(),
                granularity: options.granularity,
                stats: Arc::clone(&stats),
            }
            .run()
            .with_current_subscriber(),
        ));
        stages.push(tokio::spawn(
            UvCounter {
                receiver: uv_rx,
                directives: directive_tx,
                store: Arc::clone(&store),
                settings: options.uv.clone(),
                stats: Arc::clone(&stats),
            }
            .run()
            .with_current_subscriber(),
        ));
        stages.extend(dispatcher::spawn_workers(
            workers,
            lines,
            WorkerOutputs { pv: pv_tx, uv: uv_tx },
            options.empty_records,
            Arc::clone(&stats),
        ));

        let probe = probe::spawn_probe(store, options.probe_interval, shutdown_rx.clone());

        let tailer = tokio::spawn(
            LogTailer::new(options.tailer, dispatcher, shutdown_rx, Arc::clone(&stats))
                .run()
                .with_current_subscriber(),
        );

        Self {
            shutdown: ShutdownHandle(Arc::new(shutdown_tx)),
            tailer,
            stages,
            probe,
            stats,
            drain_timeout: options.drain_timeout,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown and wait for every stage to drain
    ///
    /// Tasks still running after the drain timeout are aborted.
    pub async fn stop(self) -> Result<StatsSnapshot, PipelineError> {
        info!("Stopping pipeline...");
        self.shutdown.signal();
        self.join(true).await
    }

    /// Wait for the pipeline to end on its own or through a `ShutdownHandle`
    pub async fn wait(self) -> Result<StatsSnapshot, PipelineError> {
        self.join(false).await
    }

    async fn join(self, bounded: bool) -> Result<StatsSnapshot, PipelineError> {
        let Pipeline {
            shutdown,
            tailer,
            stages,
            probe,
            stats,
            drain_timeout,
        } = self;

        let aborts: Vec<AbortHandle> = std::iter::once(tailer.abort_handle())
            .chain(stages.iter().map(|stage| stage.abort_handle()))
            .chain(std::iter::once(probe.abort_handle()))
            .collect();
        let abort_all = || aborts.iter().for_each(AbortHandle::abort);

        let tail_result = if bounded {
            match tokio::time::timeout(drain_timeout, tailer).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Tailer did not stop within {:?}, aborting", drain_timeout);
                    abort_all();
                    return Err(PipelineError::DrainTimeout(drain_timeout));
                }
            }
        } else {
            tailer.await
        };
        let tail_result = match tail_result {
            Ok(result) => result,
            Err(e) => {
                error!("Tailer task failed: {}", e);
                abort_all();
                return Err(e.into());
            }
        };

        // The tailer may have ended on its own; the probe still needs the signal
        shutdown.signal();

        let drain = async move {
            for stage in stages {
                stage.await?;
            }
            probe.await
        };
        match tokio::time::timeout(drain_timeout, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Pipeline stage failed: {}", e);
                abort_all();
                return Err(e.into());
            }
            Err(_) => {
                warn!("Pipeline did not drain within {:?}, aborting", drain_timeout);
                abort_all();
                return Err(PipelineError::DrainTimeout(drain_timeout));
            }
        }

        tail_result?;
        let snapshot = stats.snapshot();
        info!(stats = ?snapshot, "Pipeline stopped");
        Ok(snapshot)
    }
}
