//! Continuous tail of a growing access log

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::error::TailError;
use crate::pipeline::stats::PipelineStats;

const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub path: PathBuf,
    /// Pause after reaching end of file
    pub poll_interval: Duration,
    /// Skip existing content and only follow new lines
    pub start_at_end: bool,
    /// Open attempts before giving up
    pub open_retries: u32,
    /// First open backoff, doubled per attempt
    pub open_backoff: Duration,
    /// Log progress every this many lines
    pub progress_every: u64,
}

pub struct LogTailer {
    config: TailerConfig,
    dispatcher: Dispatcher,
    shutdown_rx: watch::Receiver<bool>,
    stats: Arc<PipelineStats>,
}

impl LogTailer {
    pub fn new(
        config: TailerConfig,
        dispatcher: Dispatcher,
        shutdown_rx: watch::Receiver<bool>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            shutdown_rx,
            stats,
        }
    }

    /// Follow the file until shutdown
    ///
    /// Only complete lines are dispatched; a trailing line still being
    /// written is held until its newline shows up.
    pub async fn run(mut self) -> Result<(), TailError> {
        let Some(file) = self.open_with_retry().await? else {
            return Ok(());
        };
        info!(path = %self.config.path.display(), "Tailing log file");

        let mut reader = BufReader::new(file);
        let mut pending: Vec<u8> = Vec::new();
        let mut count: u64 = 0;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            match reader.read_until(b'\n', &mut pending).await {
                Ok(0) => {
                    if self.pause(self.config.poll_interval).await {
                        break;
                    }
                }
                Ok(_) => {
                    if pending.last() != Some(&b'\n') {
                        continue;
                    }

                    let line = decode_line(&pending);
                    pending.clear();

                    if self.dispatcher.dispatch(line).await.is_err() {
                        warn!("All parser workers are gone, stopping tailer");
                        break;
                    }

                    count += 1;
                    PipelineStats::incr(&self.stats.lines_read);
                    if self.config.progress_every > 0 && count % self.config.progress_every == 0 {
                        info!(lines = count, "Tailer progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, line = count, "Read error while tailing");
                    if self.pause(self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!(lines = count, "Tailer stopped");
        Ok(())
    }

    /// Open the source, retrying with doubling backoff
    ///
    /// Returns `Ok(None)` if shutdown is requested while waiting to retry.
    async fn open_with_retry(&mut self) -> Result<Option<File>, TailError> {
        let attempts = self.config.open_retries.max(1);
        let mut backoff = self.config.open_backoff;

        for attempt in 1..=attempts {
            match File::open(&self.config.path).await {
                Ok(mut file) => {
                    if self.config.start_at_end {
                        file.seek(SeekFrom::End(0))
                            .await
                            .map_err(|source| TailError::Seek {
                                path: self.config.path.clone(),
                                source,
                            })?;
                    }
                    return Ok(Some(file));
                }
                Err(source) if attempt == attempts => {
                    error!(
                        path = %self.config.path.display(),
                        error = %source,
                        "Giving up opening log file"
                    );
                    return Err(TailError::Open {
                        path: self.config.path.clone(),
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    error!(
                        path = %self.config.path.display(),
                        attempt,
                        error = %e,
                        "Failed to open log file, retrying in {:?}",
                        backoff
                    );
                    if self.pause(backoff).await {
                        return Ok(None);
                    }
                    backoff = (backoff * 2).min(MAX_OPEN_BACKOFF);
                }
            }
        }

        Ok(None)
    }

    /// Sleep for `duration`, returning `true` if shutdown arrived first
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown_rx.changed() => {
                let stop = changed.is_err() || *self.shutdown_rx.borrow();
                if stop {
                    debug!("Tailer woken by shutdown");
                }
                stop
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dispatcher::line_queue;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::time::timeout;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("digstat-tailer-{}-{}-{}.log", name, std::process::id(), nanos))
    }

    fn config(path: PathBuf) -> TailerConfig {
        TailerConfig {
            path,
            poll_interval: Duration::from_millis(10),
            start_at_end: false,
            open_retries: 2,
            open_backoff: Duration::from_millis(10),
            progress_every: 0,
        }
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"abc\r\n"), "abc");
        assert_eq!(decode_line(b"abc\n"), "abc");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"a\xffb\n"), "a\u{fffd}b");
    }

    #[tokio::test]
    async fn test_follows_appended_lines() {
        let path = temp_path("follow");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "first").unwrap();
        write!(file, "sec").unwrap();
        file.flush().unwrap();

        let (dispatcher, lines) = line_queue(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PipelineStats::default());
        let tailer = LogTailer::new(config(path.clone()), dispatcher, shutdown_rx, Arc::clone(&stats));
        let handle = tokio::spawn(tailer.run());

        assert_eq!(lines.recv().await.as_deref(), Some("first"));

        // The partial line is held until it is completed
        assert!(timeout(Duration::from_millis(50), lines.recv()).await.is_err());
        writeln!(file, "ond").unwrap();
        writeln!(file, "third").unwrap();
        file.flush().unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("second"));
        assert_eq!(lines.recv().await.as_deref(), Some("third"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(lines.recv().await, None);
        assert_eq!(stats.snapshot().lines_read, 3);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_content() {
        let path = temp_path("end");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "old").unwrap();
        file.flush().unwrap();

        let (dispatcher, lines) = line_queue(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut cfg = config(path.clone());
        cfg.start_at_end = true;
        let handle = tokio::spawn(
            LogTailer::new(cfg, dispatcher, shutdown_rx, Arc::new(PipelineStats::default())).run(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        writeln!(file, "new").unwrap();
        file.flush().unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("new"));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_open_failure_after_retries() {
        let path = temp_path("missing");
        let (dispatcher, _lines) = line_queue(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = LogTailer::new(config(path), dispatcher, shutdown_rx, Arc::new(PipelineStats::default()))
            .run()
            .await;

        match result {
            Err(TailError::Open { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected open failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_during_open_retry() {
        let path = temp_path("retry");
        let (dispatcher, _lines) = line_queue(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut cfg = config(path);
        cfg.open_retries = 100;
        cfg.open_backoff = Duration::from_secs(10);

        let handle = tokio::spawn(
            LogTailer::new(cfg, dispatcher, shutdown_rx, Arc::new(PipelineStats::default())).run(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
