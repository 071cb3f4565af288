//! Diagnostic log setup
//!
//! Builds a subscriber from `LogConfig` and hands it back as a `Dispatch`
//! instead of installing it globally, so the caller decides which futures
//! it applies to.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Build the diagnostic subscriber
///
/// The returned guard must be kept alive for file output to be flushed.
pub fn build(config: &LogConfig) -> Result<(Dispatch, Option<WorkerGuard>)> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(diag_path) = config.diag_path.as_deref() else {
        let subscriber = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        return Ok((Dispatch::new(subscriber), None));
    };

    let path = Path::new(diag_path);
    let Some(file_name) = path.file_name() else {
        bail!("DIG_DIAG_LOG must name a file, got '{}'", diag_path);
    };
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .finish();

    Ok((Dispatch::new(subscriber), Some(guard)))
}
