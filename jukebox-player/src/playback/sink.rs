//! Output sinks
//!
//! The pipeline writes fixed-size PCM blocks to an [`AudioSink`] obtained
//! from a [`SinkConnector`]. The connector owns the transport lifetime
//! (connect, reconnect, disconnect); a sink is one stream for one item.
//!
//! Implementations:
//! - [`WriterSink`] over any `AsyncWrite` (stdout, file, named pipe)
//! - [`ChannelSink`] over a bounded tokio channel for in-process transports

use crate::error::SinkError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One item's output stream
#[async_trait]
pub trait AudioSink: Send {
    async fn write(&mut self, block: &[u8]) -> Result<(), SinkError>;

    async fn flush(&mut self) -> Result<(), SinkError>;
}

/// Owner of the output transport
#[async_trait]
pub trait SinkConnector: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Open a stream for the next item
    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, SinkError>;

    /// Re-establish the transport
    async fn reconnect(&self) -> Result<(), SinkError>;

    async fn disconnect(&self);
}

/// Sink over an async byte writer
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn map_io(e: std::io::Error) -> SinkError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => SinkError::Closed,
        std::io::ErrorKind::WouldBlock => SinkError::Backpressure,
        _ => SinkError::Io(e.to_string()),
    }
}

#[async_trait]
impl<W> AudioSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, block: &[u8]) -> Result<(), SinkError> {
        self.writer.write_all(block).await.map_err(map_io)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await.map_err(map_io)
    }
}

/// Where a [`StreamConnector`] writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Stdout,
    /// Regular file or named pipe, opened for append
    Path(PathBuf),
}

impl StreamTarget {
    /// `-` means stdout, anything else is a path
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            StreamTarget::Stdout
        } else {
            StreamTarget::Path(PathBuf::from(value))
        }
    }
}

/// Connector producing [`WriterSink`]s for stdout or a path
pub struct StreamConnector {
    target: StreamTarget,
    connected: AtomicBool,
}

impl StreamConnector {
    pub fn new(target: StreamTarget) -> Self {
        Self {
            target,
            connected: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    fn check_target(&self) -> Result<(), SinkError> {
        if let StreamTarget::Path(path) = &self.target {
            let parent_ok = path
                .parent()
                .map_or(true, |p| p.as_os_str().is_empty() || p.is_dir());
            if !parent_ok {
                return Err(SinkError::Io(format!(
                    "output directory for {} does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SinkConnector for StreamConnector {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        match &self.target {
            StreamTarget::Stdout => Ok(Box::new(WriterSink::new(tokio::io::stdout()))),
            StreamTarget::Path(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(map_io)?;
                Ok(Box::new(WriterSink::new(file)))
            }
        }
    }

    async fn reconnect(&self) -> Result<(), SinkError> {
        self.check_target()?;
        self.connected.store(true, Ordering::SeqCst);
        info!("Output connected: {:?}", self.target);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Output disconnected: {:?}", self.target);
        }
    }
}

/// Sink over a bounded channel
///
/// A full channel is backpressure once `send_timeout` elapses; a dropped
/// receiver is a closed sink.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    send_timeout: Duration,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }
}

#[async_trait]
impl AudioSink for ChannelSink {
    async fn write(&mut self, block: &[u8]) -> Result<(), SinkError> {
        use mpsc::error::SendTimeoutError;

        match self
            .tx
            .send_timeout(Bytes::copy_from_slice(block), self.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Backpressure),
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            Err(SinkError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Connector handing out [`ChannelSink`]s that share one channel
pub struct ChannelConnector {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    send_timeout: Duration,
}

impl ChannelConnector {
    /// Create a connector and the receiving end of its channel
    pub fn new(capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connector = Self {
            tx: Mutex::new(Some(tx)),
            send_timeout,
        };
        (connector, rx)
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
    }
}

#[async_trait]
impl SinkConnector for ChannelConnector {
    fn is_connected(&self) -> bool {
        self.sender().is_some()
    }

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        let tx = self.sender().ok_or(SinkError::Closed)?;
        Ok(Box::new(ChannelSink::new(tx, self.send_timeout)))
    }

    async fn reconnect(&self) -> Result<(), SinkError> {
        if self.sender().is_some() {
            debug!("Channel output still open");
            Ok(())
        } else {
            Err(SinkError::Closed)
        }
    }

    async fn disconnect(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
