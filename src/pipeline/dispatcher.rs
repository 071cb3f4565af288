//! Bounded line queue and the parser worker pool draining it
//!
//! The tailer pushes raw lines through a `Dispatcher`; each line is taken by
//! exactly one worker. The queue holds as many lines as there are workers and
//! a full queue suspends the producer instead of dropping lines.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, warn};

use crate::config::EmptyRecordPolicy;
use crate::models::ParsedEvent;
use crate::pipeline::parser;
use crate::pipeline::stats::PipelineStats;

/// Returned when every worker has gone away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchClosed(pub String);

/// Producer side of the line queue
pub struct Dispatcher {
    sender: mpsc::Sender<String>,
}

/// Consumer side of the line queue, shared by all workers
#[derive(Clone)]
pub struct LineReceiver {
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
}

/// Create a line queue holding up to `capacity` lines
pub fn line_queue(capacity: usize) -> (Dispatcher, LineReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        Dispatcher { sender },
        LineReceiver {
            receiver: Arc::new(Mutex::new(receiver)),
        },
    )
}

impl Dispatcher {
    /// Hand a line to the pool, waiting while the queue is full
    pub async fn dispatch(&self, line: String) -> Result<(), DispatchClosed> {
        self.sender
            .send(line)
            .await
            .map_err(|mpsc::error::SendError(line)| DispatchClosed(line))
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

impl LineReceiver {
    /// Next line, or `None` once the dispatcher is dropped and the queue drained
    pub async fn recv(&self) -> Option<String> {
        self.receiver.lock().await.recv().await
    }
}

/// Where a worker sends each parsed event; both counters get every event
#[derive(Clone)]
pub struct WorkerOutputs {
    pub pv: mpsc::Sender<ParsedEvent>,
    pub uv: mpsc::Sender<ParsedEvent>,
}

struct ParserWorker {
    id: usize,
    lines: LineReceiver,
    outputs: WorkerOutputs,
    empty_records: EmptyRecordPolicy,
    stats: Arc<PipelineStats>,
}

impl ParserWorker {
    async fn run(self) {
        debug!(worker = self.id, "Parser worker started");

        while let Some(line) = self.lines.recv().await {
            let parsed = parser::parse_event(&line);
            PipelineStats::incr(&self.stats.events_parsed);

            if parsed.record.is_empty() {
                PipelineStats::incr(&self.stats.empty_records);
                if self.empty_records == EmptyRecordPolicy::Drop {
                    PipelineStats::incr(&self.stats.dropped_records);
                    debug!(worker = self.id, line = %line, "Dropping line without a route");
                    continue;
                }
            }

            if self.outputs.pv.send(parsed.clone()).await.is_err() {
                warn!(worker = self.id, "PV counter queue closed, stopping worker");
                break;
            }
            if self.outputs.uv.send(parsed).await.is_err() {
                warn!(worker = self.id, "UV counter queue closed, stopping worker");
                break;
            }
        }

        debug!(worker = self.id, "Parser worker finished");
    }
}

/// Spawn `count` parser workers sharing one line queue
pub fn spawn_workers(
    count: usize,
    lines: LineReceiver,
    outputs: WorkerOutputs,
    empty_records: EmptyRecordPolicy,
    stats: Arc<PipelineStats>,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| {
            let worker = ParserWorker {
                id,
                lines: lines.clone(),
                outputs: outputs.clone(),
                empty_records,
                stats: Arc::clone(&stats),
            };
            tokio::spawn(worker.run().with_current_subscriber())
        })
        .collect()
}
