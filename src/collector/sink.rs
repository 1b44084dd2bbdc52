//! Destinations for mapped datapoints.

use crate::core::{Datapoint, MonitorError, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

/// Receives datapoints as soon as a response has been mapped
#[async_trait]
pub trait DatapointSink: Send + Sync {
    /// Emits one response's worth of datapoints
    async fn emit(&self, datapoints: Vec<Datapoint>) -> Result<()>;
}

/// Forwards datapoints into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Datapoint>,
}

impl ChannelSink {
    /// Wraps an existing sender
    pub fn new(sender: mpsc::Sender<Datapoint>) -> Self {
        Self { sender }
    }

    /// Creates a sink and the receiver it feeds
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Datapoint>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl DatapointSink for ChannelSink {
    async fn emit(&self, datapoints: Vec<Datapoint>) -> Result<()> {
        for datapoint in datapoints {
            self.sender
                .send(datapoint)
                .await
                .map_err(|_| MonitorError::SinkClosed)?;
        }
        Ok(())
    }
}

/// Writes each datapoint as one JSON object per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

/// JSON lines on standard output
pub type StdoutSink = JsonLinesSink<tokio::io::Stdout>;

impl StdoutSink {
    /// Creates a sink writing to stdout
    pub fn stdout() -> Self {
        JsonLinesSink::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the wrapped writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> DatapointSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, datapoints: Vec<Datapoint>) -> Result<()> {
        let mut buffer = Vec::new();
        for datapoint in &datapoints {
            serde_json::to_writer(&mut buffer, datapoint)?;
            buffer.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buffer).await?;
        writer.flush().await?;
        Ok(())
    }
}
