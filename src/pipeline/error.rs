use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {} after {attempts} attempts: {source}", .path.display())]
    Open {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to seek to end of {}: {source}", .path.display())]
    Seek {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tail(#[from] TailError),

    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("pipeline did not drain within {0:?}")]
    DrainTimeout(Duration),
}
