//! Newline-delimited JSON over a byte stream pair.
//!
//! Each frame is one line of compact JSON. The host talks to a worker over
//! the worker's stdin/stdout; the worker talks back over its own. Worker
//! logging therefore has to go to stderr.
//!
//! Inbound lines longer than the frame limit fail the channel instead of
//! being buffered.

use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::{MessageSink, MessageSource, Transport, TransportEvent};
use crate::error::ChannelFailure;

/// Largest inbound frame accepted by default, excluding the newline.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frames as lines of JSON over an `AsyncRead`/`AsyncWrite` pair.
#[derive(Debug)]
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    max_frame_len: usize,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a reader and a writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Cap the length of inbound frames. A longer line fails the channel.
    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl StdioTransport<ChildStdout, ChildStdin> {
    /// Take the piped stdin/stdout of a spawned worker.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelFailure`] if either pipe was not configured or has
    /// already been taken.
    pub fn from_child(child: &mut Child) -> Result<Self, ChannelFailure> {
        let writer = child
            .stdin
            .take()
            .ok_or_else(|| ChannelFailure::new("worker stdin is not piped"))?;
        let reader = child
            .stdout
            .take()
            .ok_or_else(|| ChannelFailure::new("worker stdout is not piped"))?;
        Ok(Self::new(reader, writer))
    }
}

impl StdioTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// The current process's stdin/stdout, as seen from inside a worker.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (the writer runs as a task).
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        tokio::spawn(write_frames(self.writer, rx, failure_tx));

        (
            Box::new(StdioSink {
                tx: Mutex::new(Some(tx)),
            }),
            Box::new(StdioSource {
                reader: BufReader::new(self.reader),
                buf: Vec::new(),
                max_frame_len: self.max_frame_len,
                writer_failure: Some(failure_rx),
            }),
        )
    }
}

/// Drain queued frames into the writer until every sink is gone, then shut
/// the stream down so the peer sees end-of-file.
async fn write_frames<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Value>,
    failure_tx: oneshot::Sender<ChannelFailure>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let mut line = frame.to_string();
        line.push('\n');
        if let Err(e) = write_line(&mut writer, line.as_bytes()).await {
            debug!(error = %e, "failed to write frame");
            let _ = failure_tx.send(ChannelFailure::new(format!("failed to write frame: {e}")));
            return;
        }
        trace!(bytes = line.len(), "frame written");
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "failed to shut down frame writer");
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}

struct StdioSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

impl MessageSink for StdioSink {
    fn send(&self, message: Value) -> Result<(), ChannelFailure> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or_else(ChannelFailure::closed_locally)?;
        tx.send(message)
            .map_err(|_| ChannelFailure::new("frame writer stopped"))
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct StdioSource<R> {
    reader: BufReader<R>,
    /// Bytes of the frame being read. Survives a cancelled read.
    buf: Vec<u8>,
    max_frame_len: usize,
    writer_failure: Option<oneshot::Receiver<ChannelFailure>>,
}

impl<R> StdioSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn decode(&mut self) -> Option<TransportEvent> {
        let frame = std::mem::take(&mut self.buf);
        if frame.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        trace!(bytes = frame.len(), "frame read");
        Some(match serde_json::from_slice(&frame) {
            Ok(frame) => TransportEvent::Message(frame),
            Err(e) => TransportEvent::Failed(ChannelFailure::new(format!("undecodable frame: {e}"))),
        })
    }
}

#[async_trait]
impl<R> MessageSource for StdioSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let read = tokio::select! {
                failure = writer_failed(&mut self.writer_failure) => {
                    return TransportEvent::Failed(failure);
                },
                read = fill(&mut self.reader, &mut self.buf, self.max_frame_len) => read,
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    return TransportEvent::Failed(ChannelFailure::new(format!("failed to read frame: {e}")));
                },
            };

            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if let Some(event) = self.decode() {
                    return event;
                }
            } else if self.buf.len() > self.max_frame_len {
                debug!(max = self.max_frame_len, "inbound frame exceeds the limit");
                self.buf.clear();
                return TransportEvent::Failed(ChannelFailure::frame_too_large(self.max_frame_len));
            } else if n == 0 {
                // A final frame without a trailing newline still counts.
                if let Some(event) = self.decode() {
                    return event;
                }
                return TransportEvent::Failed(ChannelFailure::peer_closed());
            }
        }
    }
}

/// Read until a newline, end-of-file, or one byte past `max_frame_len`.
async fn fill<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>, max_frame_len: usize) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let remaining = max_frame_len.saturating_add(1).saturating_sub(buf.len());
    let limit = u64::try_from(remaining).unwrap_or(u64::MAX);
    reader.take(limit).read_until(b'\n', buf).await
}

/// Resolves with the writer's failure; pends forever if the writer ended
/// cleanly.
async fn writer_failed(rx: &mut Option<oneshot::Receiver<ChannelFailure>>) -> ChannelFailure {
    let result = match rx.as_mut() {
        Some(rx) => rx.await,
        None => return std::future::pending().await,
    };
    *rx = None;
    match result {
        Ok(failure) => failure,
        Err(_) => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn writes_one_frame_per_line() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (sink, _source) = StdioTransport::new(our_read, our_write).split();

        sink.send(json!({"type": "request", "token": "a"})).unwrap();
        sink.send(json!({"type": "request", "token": "b"})).unwrap();

        let mut lines = BufReader::new(theirs).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["token"], "a");
        assert_eq!(second["token"], "b");
    }

    #[tokio::test]
    async fn reads_frames_and_skips_blank_lines() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (_sink, mut source) = StdioTransport::new(our_read, our_write).split();

        theirs.write_all(b"\n{\"n\":1}\n  \n{\"n\":2}\n").await.unwrap();

        assert_eq!(source.next_event().await, TransportEvent::Message(json!({"n": 1})));
        assert_eq!(source.next_event().await, TransportEvent::Message(json!({"n": 2})));
    }

    #[tokio::test]
    async fn eof_fails_the_channel() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (_sink, mut source) = StdioTransport::new(our_read, our_write).split();

        drop(theirs);

        assert_eq!(
            source.next_event().await,
            TransportEvent::Failed(ChannelFailure::peer_closed())
        );
    }

    #[tokio::test]
    async fn undecodable_frame_fails_the_channel() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (_sink, mut source) = StdioTransport::new(our_read, our_write).split();

        theirs.write_all(b"{not json\n").await.unwrap();

        match source.next_event().await {
            TransportEvent::Failed(failure) => assert!(failure.reason().contains("undecodable")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_fails_the_channel() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (_sink, mut source) = StdioTransport::new(our_read, our_write)
            .with_max_frame_len(16)
            .split();

        // No newline ever arrives; the reader gives up past the limit.
        theirs.write_all(&[b'x'; 48]).await.unwrap();

        assert_eq!(
            source.next_event().await,
            TransportEvent::Failed(ChannelFailure::frame_too_large(16))
        );
    }

    #[tokio::test]
    async fn frame_at_the_limit_is_accepted() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (_sink, mut source) = StdioTransport::new(our_read, our_write)
            .with_max_frame_len(8)
            .split();

        theirs.write_all(b"\"123456\"\n{\"n\":1}").await.unwrap();
        drop(theirs);

        assert_eq!(source.next_event().await, TransportEvent::Message(json!("123456")));
        assert_eq!(source.next_event().await, TransportEvent::Message(json!({"n": 1})));
        assert_eq!(
            source.next_event().await,
            TransportEvent::Failed(ChannelFailure::peer_closed())
        );
    }

    #[tokio::test]
    async fn close_sends_eof_to_the_peer() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (sink, _source) = StdioTransport::new(our_read, our_write).split();

        sink.send(json!("bye")).unwrap();
        sink.close();

        let mut lines = BufReader::new(theirs).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("\"bye\""));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
