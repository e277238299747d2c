//! Message channels between two peers.
//!
//! A [`Transport`] splits into a [`MessageSink`] for outbound frames and a
//! [`MessageSource`] yielding inbound frames in arrival order. Once the
//! source yields [`TransportEvent::Failed`] the channel is dead and no
//! further frames are delivered.

mod channel;
mod stdio;

pub use channel::ChannelTransport;
pub use stdio::{DEFAULT_MAX_FRAME_LEN, StdioTransport};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChannelFailure;

/// One inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded frame.
    Message(Value),
    /// The channel is permanently unusable.
    Failed(ChannelFailure),
}

/// Outbound half of a transport.
pub trait MessageSink: Send + Sync + 'static {
    /// Enqueue a frame for delivery. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelFailure`] if the channel can no longer carry frames.
    fn send(&self, message: Value) -> Result<(), ChannelFailure>;

    /// Stop accepting frames and let the peer observe end-of-stream.
    fn close(&self);
}

/// Inbound half of a transport.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Wait for the next inbound event.
    async fn next_event(&mut self) -> TransportEvent;
}

/// A bidirectional, order-preserving message channel.
pub trait Transport: Send + 'static {
    /// Split into the outbound and inbound halves.
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageSource>);
}
