use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{info, warn};

use digstat::config::{Config, DedupBackend};
use digstat::dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
use digstat::logging;
use digstat::pipeline::{Pipeline, PipelineOptions};
use digstat::sink::{LogSink, StorageSink};

/// Tail a tracking-pixel access log and count PV/UV per route
#[derive(Parser)]
#[command(name = "digstat")]
#[command(about = "Near-real-time PV/UV counters from dig access logs", long_about = None)]
struct Cli {
    /// Log file path (overrides DIG_LOG_PATH)
    #[arg(short = 'p', long = "path")]
    path: Option<String>,

    /// Number of parser workers (overrides DIG_WORKERS)
    #[arg(short = 'n', long = "workers")]
    workers: Option<usize>,

    /// Diagnostic log file (overrides DIG_DIAG_LOG)
    #[arg(short = 't', long = "target")]
    target: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(path) = cli.path {
        config.source.path = path;
    }
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.source.workers = workers;
    }
    if let Some(target) = cli.target {
        config.log.diag_path = Some(target);
    }

    let (dispatch, _log_guard) = logging::build(&config.log)?;
    run(config).with_subscriber(dispatch).await
}

async fn run(config: Config) -> Result<()> {
    info!("Analysis process start");
    for warning in &config.warnings {
        warn!("{}", warning);
    }
    info!(
        "Params: path={}, workers={}, diag_log={:?}",
        config.source.path, config.source.workers, config.log.diag_path
    );

    // Initialize dedup store
    let store: Arc<dyn DedupStore> = match config.dedup.backend {
        DedupBackend::Redis => {
            info!("Using Redis dedup store: {}", config.dedup.redis_url);
            Arc::new(
                RedisDedupStore::connect(&config.dedup.redis_url)
                    .await
                    .context("Failed to open the dedup store")?,
            )
        }
        DedupBackend::Memory => {
            warn!("Using in-memory dedup store; UV windows reset on restart");
            Arc::new(MemoryDedupStore::default())
        }
    };

    let sink: Arc<dyn StorageSink> = Arc::new(LogSink::stdout());
    let pipeline = Pipeline::start(PipelineOptions::from_config(&config), store, sink);

    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    shutdown.signal();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
        .with_current_subscriber(),
    );

    let stats = pipeline.wait().await?;
    info!(
        "Analysis process end: lines={}, pv={}, uv={}",
        stats.lines_read, stats.pv_emitted, stats.uv_emitted
    );
    Ok(())
}
