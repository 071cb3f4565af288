//! Sink that writes every directive as one JSON line

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::models::CounterDirective;
use crate::sink::{SinkResult, StorageSink};

pub struct LogSink<W = Stdout> {
    writer: Mutex<W>,
}

impl LogSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> LogSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> StorageSink for LogSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn accept(&self, directive: CounterDirective) -> SinkResult<()> {
        let mut line = serde_json::to_vec(&directive)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
