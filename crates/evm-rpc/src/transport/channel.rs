//! In-memory transport for workers running inside the host process.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource, Transport, TransportEvent};
use crate::error::ChannelFailure;

/// One end of an in-memory channel pair.
///
/// Frames sent on one end arrive on the other. When one end's sink is
/// closed or dropped, the other end's source reports
/// [`ChannelFailure::peer_closed`].
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Value>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ChannelTransport {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }
}

impl Transport for ChannelTransport {
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageSource>) {
        (
            Box::new(ChannelSink {
                tx: Mutex::new(Some(self.tx)),
            }),
            Box::new(ChannelSource { rx: self.rx }),
        )
    }
}

struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

impl MessageSink for ChannelSink {
    fn send(&self, message: Value) -> Result<(), ChannelFailure> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or_else(ChannelFailure::closed_locally)?;
        tx.send(message).map_err(|_| ChannelFailure::peer_closed())
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Value>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_event(&mut self) -> TransportEvent {
        match self.rx.recv().await {
            Some(message) => TransportEvent::Message(message),
            None => TransportEvent::Failed(ChannelFailure::peer_closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (a, b) = ChannelTransport::pair();
        let (a_sink, _a_source) = a.split();
        let (_b_sink, mut b_source) = b.split();

        a_sink.send(json!(1)).unwrap();
        a_sink.send(json!(2)).unwrap();

        assert_eq!(b_source.next_event().await, TransportEvent::Message(json!(1)));
        assert_eq!(b_source.next_event().await, TransportEvent::Message(json!(2)));
    }

    #[tokio::test]
    async fn dropping_one_end_fails_the_other() {
        let (a, b) = ChannelTransport::pair();
        let (_b_sink, mut b_source) = b.split();
        drop(a);

        assert_eq!(
            b_source.next_event().await,
            TransportEvent::Failed(ChannelFailure::peer_closed())
        );
    }

    #[tokio::test]
    async fn close_ends_the_stream_for_the_peer() {
        let (a, b) = ChannelTransport::pair();
        let (a_sink, _a_source) = a.split();
        let (_b_sink, mut b_source) = b.split();

        a_sink.send(json!("last")).unwrap();
        a_sink.close();

        assert_eq!(b_source.next_event().await, TransportEvent::Message(json!("last")));
        assert!(matches!(b_source.next_event().await, TransportEvent::Failed(_)));
        assert_eq!(a_sink.send(json!("late")), Err(ChannelFailure::closed_locally()));
    }
}
