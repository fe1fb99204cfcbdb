//! Event sinks shipped with the harvester.
//!
//! - [`JsonLinesSink`] writes one JSON object per line to any async writer
//!   (the binary points it at stdout)
//! - [`ChannelSink`] hands events to an in-process consumer over `mpsc`

use crate::model::Event;
use crate::traits::{EventSink, SinkError};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> EventSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, event: Event) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Forwards events to an in-process receiver.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: Event) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportKind;

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.publish(Event::new(TransportKind::Ftp, "alpha"))
            .await
            .unwrap();
        sink.publish(Event::new(TransportKind::Ftp, "beta"))
            .await
            .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Event = serde_json::from_str(lines[0]).unwrap();
        let second: Event = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first.message, "alpha");
        assert_eq!(second.message, "beta");
        assert_eq!(second.kind, TransportKind::Ftp);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_and_reports_closed() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.publish(Event::new(TransportKind::Sftp, "line"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().message, "line");

        drop(rx);
        let err = sink
            .publish(Event::new(TransportKind::Sftp, "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }
}
